use serde::{Deserialize, Serialize};

use super::action::Action;
use super::grid::{Cell, CellType, Grid};
use super::rules::Rules;

/// The seed source. Restocked to a fixed quota every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shed {
    #[serde(skip)]
    pub x: i32,
    #[serde(skip)]
    pub y: i32,
    pub seeds_available: u32,
}

impl Shed {
    pub fn new(rules: &Rules) -> Shed {
        Shed {
            x: rules.shed_position.0,
            y: rules.shed_position.1,
            seeds_available: rules.shed_seeds_per_cycle,
        }
    }

    pub fn restock(&mut self, rules: &Rules) {
        self.seeds_available = rules.shed_seeds_per_cycle;
    }

    /// Take up to `n` seeds, returns how many were actually taken.
    pub fn take_seeds(&mut self, n: u32) -> u32 {
        let amount = n.min(self.seeds_available);
        self.seeds_available -= amount;
        amount
    }
}

/// The unit controlled by the bot.
///
/// `seeds + rice` never exceeds `Rules::max_carry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farmer {
    pub x: i32,
    pub y: i32,
    pub seeds: u32,
    pub rice: u32,
    pub rice_grams: u64,
}

/// What resolving one action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// AP the action asks for, at least 1
    pub cost: u32,
    pub changes: Vec<Cell>,
    pub score_delta: u64,
}

impl Outcome {
    fn noop() -> Outcome {
        Outcome {
            cost: 1,
            changes: vec![],
            score_delta: 0,
        }
    }

    fn cost(cost: u32) -> Outcome {
        Outcome {
            cost: cost.max(1),
            ..Outcome::noop()
        }
    }
}

impl Farmer {
    pub fn new(rules: &Rules) -> Farmer {
        let (x, y) = rules.farmer_spawn;
        Farmer {
            x,
            y,
            seeds: 0,
            rice: 0,
            rice_grams: 0,
        }
    }

    pub fn reset(&mut self, rules: &Rules) {
        *self = Farmer::new(rules);
    }

    pub fn inventory_count(&self) -> u32 {
        self.seeds + self.rice
    }

    pub fn is_full(&self, rules: &Rules) -> bool {
        self.inventory_count() >= rules.max_carry
    }

    /// Chebyshev neighbour, the farmer's own cell excluded.
    pub fn is_adjacent_to(&self, x: i32, y: i32) -> bool {
        (self.x - x).abs() <= 1 && (self.y - y).abs() <= 1 && (self.x, self.y) != (x, y)
    }

    fn offset(&self, dx: i64, dy: i64) -> Option<(i32, i32)> {
        let x = i32::try_from(i64::from(self.x).checked_add(dx)?).ok()?;
        let y = i32::try_from(i64::from(self.y).checked_add(dy)?).ok()?;
        Some((x, y))
    }

    /// Apply one action against the grid and shed.
    ///
    /// Invalid actions are no-ops costing 1 AP. The cost returned is the full cost of the
    /// action; capping it at the AP left is up to the caller.
    pub fn resolve(
        &mut self,
        action: Action,
        grid: &mut Grid,
        shed: &mut Shed,
        rules: &Rules,
    ) -> Outcome {
        match action {
            Action::Wait => Outcome::noop(),
            Action::Move { dx, dy } => self.do_move(dx, dy, grid),
            Action::GetSeeds { n } => self.do_get_seeds(n, shed, rules),
            Action::Plant { dx, dy } => self.do_plant(dx, dy, grid),
            Action::Harvest { dx, dy } => self.do_harvest(dx, dy, grid, rules),
            Action::Deposit => self.do_deposit(shed),
        }
    }

    fn do_move(&mut self, dx: i64, dy: i64, grid: &Grid) -> Outcome {
        let step = (-1..=1).contains(&dx) && (-1..=1).contains(&dy) && (dx, dy) != (0, 0);
        if !step {
            return Outcome::noop();
        }
        match self.offset(dx, dy) {
            Some((x, y)) if grid.is_passable(x, y) => {
                self.x = x;
                self.y = y;
            }
            _ => {}
        }
        Outcome::noop()
    }

    fn do_get_seeds(&mut self, n: i64, shed: &mut Shed, rules: &Rules) -> Outcome {
        if !self.is_adjacent_to(shed.x, shed.y) {
            return Outcome::noop();
        }
        let space = rules.max_carry.saturating_sub(self.inventory_count());
        let wanted = u32::try_from(n.max(1)).unwrap_or(u32::MAX);
        let taken = shed.take_seeds(wanted.min(space));
        self.seeds += taken;
        // one AP per seed
        Outcome::cost(taken)
    }

    fn do_plant(&mut self, dx: i64, dy: i64, grid: &mut Grid) -> Outcome {
        let Some((x, y)) = self.offset(dx, dy) else {
            return Outcome::noop();
        };
        if !self.is_adjacent_to(x, y) || self.seeds == 0 {
            return Outcome::noop();
        }
        let Some(cell) = grid.get_mut(x, y).filter(|c| c.cell_type == CellType::Empty) else {
            return Outcome::noop();
        };
        cell.cell_type = CellType::Planted;
        cell.growth_ticks = 0;
        self.seeds -= 1;
        Outcome {
            changes: vec![*cell],
            ..Outcome::noop()
        }
    }

    fn do_harvest(&mut self, dx: i64, dy: i64, grid: &mut Grid, rules: &Rules) -> Outcome {
        let Some((x, y)) = self.offset(dx, dy) else {
            return Outcome::noop();
        };
        if !self.is_adjacent_to(x, y) || self.is_full(rules) {
            return Outcome::noop();
        }
        let Some(cell) = grid.get_mut(x, y).filter(|c| c.cell_type == CellType::Ripe) else {
            return Outcome::noop();
        };
        self.rice += 1;
        self.rice_grams += u64::from(cell.soil.map_or(0, |s| s.yield_grams()));
        cell.cell_type = CellType::Empty;
        cell.growth_ticks = 0;
        Outcome {
            changes: vec![*cell],
            ..Outcome::noop()
        }
    }

    fn do_deposit(&mut self, shed: &Shed) -> Outcome {
        if !self.is_adjacent_to(shed.x, shed.y) || self.rice == 0 {
            return Outcome::noop();
        }
        let count = self.rice;
        let score_delta = self.rice_grams;
        self.rice = 0;
        self.rice_grams = 0;
        // one AP per rice item
        Outcome {
            score_delta,
            ..Outcome::cost(count)
        }
    }
}

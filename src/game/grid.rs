use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::rules::Rules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Empty,
    Rock,
    Shed,
    Planted,
    Growing,
    Ripe,
}

impl CellType {
    /// Crop states, wiped at the start of every cycle.
    pub fn is_crop(self) -> bool {
        matches!(self, CellType::Planted | CellType::Growing | CellType::Ripe)
    }
}

/// Soil quality, fixed at generation. Rock and shed cells carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Soil {
    Good,
    Great,
    Best,
}

impl Soil {
    const ALL: [Soil; 3] = [Soil::Good, Soil::Great, Soil::Best];

    /// Grams of rice one harvest yields.
    pub fn yield_grams(self) -> u32 {
        match self {
            Soil::Good => 250,
            Soil::Great => 500,
            Soil::Best => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub soil: Option<Soil>,
    pub growth_ticks: u32,
}

impl Cell {
    fn new(x: i32, y: i32, cell_type: CellType, soil: Option<Soil>) -> Cell {
        Cell {
            x,
            y,
            cell_type,
            soil,
            growth_ticks: 0,
        }
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

/// Full grid as sent in the `init` message and stored in the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub width: i32,
    pub height: i32,
    pub cells: Vec<Cell>,
}

/// The world. Cells are stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
}

impl Grid {
    /// Deterministically generate a grid: shed at its fixed position, `rules.rocks` rocks on
    /// cells other than the shed and the farmer spawn, every other cell empty with a uniformly
    /// drawn soil tier.
    pub fn generate(rules: &Rules, seed: u64) -> Grid {
        let mut rng = StdRng::seed_from_u64(seed);
        let protected = [rules.shed_position, rules.farmer_spawn];

        let available = (0..rules.height)
            .flat_map(|y| (0..rules.width).map(move |x| (x, y)))
            .filter(|pos| !protected.contains(pos))
            .collect::<Vec<_>>();
        let rock_count = rules.rocks.min(available.len());
        let rocks = index::sample(&mut rng, available.len(), rock_count)
            .into_iter()
            .map(|i| available[i])
            .collect::<std::collections::HashSet<_>>();

        let mut cells = Vec::with_capacity((rules.width * rules.height) as usize);
        for y in 0..rules.height {
            for x in 0..rules.width {
                let cell = if (x, y) == rules.shed_position {
                    Cell::new(x, y, CellType::Shed, None)
                } else if rocks.contains(&(x, y)) {
                    Cell::new(x, y, CellType::Rock, None)
                } else {
                    let soil = Soil::ALL[rng.random_range(0..Soil::ALL.len())];
                    Cell::new(x, y, CellType::Empty, Some(soil))
                };
                cells.push(cell);
            }
        }

        Grid {
            width: rules.width,
            height: rules.height,
            cells,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_in_bounds(&self, x: i32, y: i32) -> bool {
        0 <= x && x < self.width && 0 <= y && y < self.height
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        self.is_in_bounds(x, y)
            .then(|| (y * self.width + x) as usize)
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&Cell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    pub(crate) fn get_mut(&mut self, x: i32, y: i32) -> Option<&mut Cell> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    /// Only rocks block movement; crops and the shed can be walked over.
    pub fn is_passable(&self, x: i32, y: i32) -> bool {
        self.get(x, y)
            .is_some_and(|cell| cell.cell_type != CellType::Rock)
    }

    /// Revert every crop to empty ground. Returns the cells that changed.
    pub fn reset_cycle(&mut self) -> Vec<Cell> {
        let mut changed = vec![];
        for cell in self.cells.iter_mut().filter(|c| c.cell_type.is_crop()) {
            cell.cell_type = CellType::Empty;
            cell.growth_ticks = 0;
            changed.push(*cell);
        }
        changed
    }

    /// Advance every planted/growing cell by one tick. A crop starts growing at its first tick
    /// and is ripe once it reaches `ripe_after`. Returns the cells that changed.
    pub fn tick_growth(&mut self, ripe_after: u32) -> Vec<Cell> {
        let mut changed = vec![];
        for cell in self.cells.iter_mut().filter(|c| {
            matches!(c.cell_type, CellType::Planted | CellType::Growing)
        }) {
            cell.growth_ticks += 1;
            cell.cell_type = if cell.growth_ticks >= ripe_after {
                CellType::Ripe
            } else {
                CellType::Growing
            };
            changed.push(*cell);
        }
        changed
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            width: self.width,
            height: self.height,
            cells: self.cells.clone(),
        }
    }
}

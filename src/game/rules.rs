/// Fixed parameters of one simulation run.
///
/// The defaults are the values bot authors program against. Tests shrink
/// `cycles` and `ap_per_cycle` to keep runs short; nothing else in the engine
/// depends on the concrete numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub width: i32,
    pub height: i32,
    pub shed_position: (i32, i32),
    pub farmer_spawn: (i32, i32),
    pub rocks: usize,
    pub ap_per_cycle: u32,
    pub cycles: u32,
    pub max_carry: u32,
    pub shed_seeds_per_cycle: u32,
    /// growth ticks after which a crop is ripe
    pub ripe_after: u32,
    /// bot display names are cut to this many characters
    pub max_name_len: usize,
}

impl Rules {
    pub const GRID_WIDTH: i32 = 64;
    pub const GRID_HEIGHT: i32 = 64;
    pub const SHED_POSITION: (i32, i32) = (0, 0);
    pub const FARMER_SPAWN: (i32, i32) = (1, 0);
    pub const NUM_ROCKS: usize = 200;
    pub const AP_PER_CYCLE: u32 = 100;
    pub const CYCLES_PER_RUN: u32 = 5;
    pub const MAX_CARRY: u32 = 10;
    pub const SHED_SEEDS_PER_CYCLE: u32 = 50;
    pub const SEED_GROWTH_TICKS: u32 = 5;
    pub const MAX_NAME_LEN: usize = 64;

    pub fn new() -> Self {
        Self {
            width: Self::GRID_WIDTH,
            height: Self::GRID_HEIGHT,
            shed_position: Self::SHED_POSITION,
            farmer_spawn: Self::FARMER_SPAWN,
            rocks: Self::NUM_ROCKS,
            ap_per_cycle: Self::AP_PER_CYCLE,
            cycles: Self::CYCLES_PER_RUN,
            max_carry: Self::MAX_CARRY,
            shed_seeds_per_cycle: Self::SHED_SEEDS_PER_CYCLE,
            ripe_after: Self::SEED_GROWTH_TICKS,
            max_name_len: Self::MAX_NAME_LEN,
        }
    }

    #[must_use]
    pub fn with_cycles(self, cycles: u32) -> Self {
        Self { cycles, ..self }
    }

    #[must_use]
    pub fn with_ap_per_cycle(self, ap_per_cycle: u32) -> Self {
        Self {
            ap_per_cycle,
            ..self
        }
    }

    #[must_use]
    pub fn with_rocks(self, rocks: usize) -> Self {
        Self { rocks, ..self }
    }

    pub fn is_in_bounds(&self, x: i32, y: i32) -> bool {
        0 <= x && x < self.width && 0 <= y && y < self.height
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self::new()
    }
}

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::farmer::Farmer;
use super::grid::{Cell, GridSnapshot};

/// Complete record of one run. Printed by the runner as its only stdout document and kept as
/// the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    pub bot_name: String,
    /// mean of `cycle_scores`
    pub final_score: f64,
    pub cycle_scores: Vec<f64>,
    pub seed: u64,
    pub initial_grid: GridSnapshot,
    pub cycles: Vec<CycleRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u32,
    pub score: u64,
    pub ticks: Vec<TickRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// AP spent so far in the cycle
    pub tick: u32,
    pub ap_cost: u32,
    pub ap_remaining: u32,
    pub farmer: Farmer,
    pub action: Action,
    /// growth then action changes of this tick
    pub cell_changes: Vec<Cell>,
    pub score_this_cycle: u64,
}

impl Replay {
    pub(crate) fn new(seed: u64, initial_grid: GridSnapshot) -> Replay {
        Replay {
            bot_name: String::new(),
            final_score: 0.0,
            cycle_scores: vec![],
            seed,
            initial_grid,
            cycles: vec![],
        }
    }

    pub(crate) fn finish(&mut self) {
        self.cycle_scores = self.cycles.iter().map(|c| c.score as f64).collect();
        self.final_score = if self.cycle_scores.is_empty() {
            0.0
        } else {
            self.cycle_scores.iter().sum::<f64>() / self.cycle_scores.len() as f64
        };
    }
}

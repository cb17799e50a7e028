#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use farm_arena::game::{BotChannel, Cell, CellType, Grid, Message, Rules, Soil, TickState};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_ansi(true)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// In-process bot answering from a fixed script, then silent.
#[derive(Debug, Default)]
pub struct ScriptedBot {
    replies: VecDeque<Option<String>>,
    pub sent: Vec<String>,
}

impl ScriptedBot {
    pub fn new(name: &str, actions: &[&str]) -> ScriptedBot {
        let mut replies = VecDeque::from([Some(name.to_string())]);
        replies.extend(actions.iter().map(|a| Some(a.to_string())));
        ScriptedBot {
            replies,
            sent: vec![],
        }
    }

    pub fn ticks(&self) -> Vec<TickState> {
        self.sent
            .iter()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(Message::Tick(state)) => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl BotChannel for ScriptedBot {
    fn send(&mut self, line: &str) {
        self.sent.push(line.to_string());
    }

    fn receive(&mut self, _timeout: Duration) -> Option<String> {
        self.replies.pop_front().flatten()
    }
}

/// First seed (and target offset from the spawn) where an empty best-soil cell touches the
/// farmer's spawn without being next to nothing else of interest.
pub fn seed_with_best_soil_near_spawn(rules: &Rules) -> (u64, (i64, i64)) {
    let (sx, sy) = rules.farmer_spawn;
    for seed in 0..10_000 {
        let grid = Grid::generate(rules, seed);
        for (dx, dy) in [(1, 0), (0, 1), (1, 1), (-1, 1)] {
            let target = grid.get(sx + dx, sy + dy);
            if matches!(
                target,
                Some(Cell {
                    cell_type: CellType::Empty,
                    soil: Some(Soil::Best),
                    ..
                })
            ) {
                return (seed, (dx as i64, dy as i64));
            }
        }
    }
    panic!("no seed puts best soil next to the spawn");
}

/// Alive and not a zombie waiting to be reaped.
#[cfg(target_os = "linux")]
pub fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .map(|(_, rest)| !rest.starts_with(['Z', 'X']))
            .unwrap_or(false),
        Err(_) => false,
    }
}

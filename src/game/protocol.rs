//! Messages sent from the engine to the bot, one JSON document per line.
//!
//! The bot answers the `init` message with a plain-text display name, and every `tick` message
//! with one [`Action`](super::action::Action). After `end` it is expected to exit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::farmer::{Farmer, Shed};
use super::grid::{Cell, GridSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Init { grid: GridSnapshot },
    Tick(TickState),
    End,
}

/// Everything the bot sees at the start of a tick.
///
/// `cell_changes` lets the bot keep its own copy of the grid in sync: applying them to the
/// grid from `init` (and every previous tick) yields the current grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickState {
    pub cycle: u32,
    pub ap_remaining: u32,
    pub farmer: Farmer,
    pub shed: Shed,
    pub score_this_cycle: u64,
    pub cell_changes: Vec<Cell>,
}

impl Message {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(%e, "could not serialize protocol message");
            String::new()
        })
    }
}

/// Concatenate change-sets, keeping one entry per position holding its latest state.
pub fn merge_changes<'a>(sets: impl IntoIterator<Item = &'a [Cell]>) -> Vec<Cell> {
    let mut merged: Vec<Cell> = vec![];
    let mut seen: HashMap<(i32, i32), usize> = HashMap::new();
    for cell in sets.into_iter().flatten() {
        match seen.get(&cell.position()) {
            Some(&i) => merged[i] = *cell,
            None => {
                seen.insert(cell.position(), merged.len());
                merged.push(*cell);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::{CellType, Soil};
    use crate::game::rules::Rules;

    fn cell(x: i32, y: i32, cell_type: CellType) -> Cell {
        Cell {
            x,
            y,
            cell_type,
            soil: Some(Soil::Good),
            growth_ticks: 0,
        }
    }

    #[test]
    fn merge_keeps_latest_state_per_cell() {
        let harvested = [cell(2, 0, CellType::Empty)];
        let reset = [cell(3, 3, CellType::Empty)];
        let growth = [cell(2, 0, CellType::Growing), cell(4, 4, CellType::Ripe)];
        let merged = merge_changes([&harvested[..], &reset[..], &growth[..]]);
        assert_eq!(
            merged,
            vec![
                cell(2, 0, CellType::Growing),
                cell(3, 3, CellType::Empty),
                cell(4, 4, CellType::Ripe),
            ]
        );
    }

    #[test]
    fn tick_wire_shape() {
        let rules = Rules::new();
        let msg = Message::Tick(TickState {
            cycle: 2,
            ap_remaining: 57,
            farmer: Farmer::new(&rules),
            shed: Shed::new(&rules),
            score_this_cycle: 500,
            cell_changes: vec![],
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "tick",
                "cycle": 2,
                "ap_remaining": 57,
                "farmer": {"x": 1, "y": 0, "seeds": 0, "rice": 0, "rice_grams": 0},
                "shed": {"seeds_available": 50},
                "score_this_cycle": 500,
                "cell_changes": []
            })
        );
    }

    #[test]
    fn end_and_init_wire_shape() {
        assert_eq!(Message::End.to_line(), r#"{"type":"end"}"#);
        let init = Message::Init {
            grid: GridSnapshot {
                width: 1,
                height: 1,
                cells: vec![cell(0, 0, CellType::Empty)],
            },
        };
        assert_eq!(
            init.to_line(),
            r#"{"type":"init","grid":{"width":1,"height":1,"cells":[{"x":0,"y":0,"type":"empty","soil":"good","growth_ticks":0}]}}"#
        );
    }
}

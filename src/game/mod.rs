//! The deterministic rice-farming simulation.
//!
//! A run is one [`Engine`] playing [`Rules::cycles`] cycles against one bot reached through a
//! [`BotChannel`]. Every cycle the grid's crops are wiped, the shed is restocked and the farmer
//! goes back to spawn with an empty inventory; the bot then spends `ap_per_cycle` action points,
//! one action per tick. The score of a cycle is the grams of rice deposited at the shed, and the
//! final score is the mean over cycles.
//!
//! Within a tick, grid mutations always happen in the same order: cycle reset (first tick of a
//! cycle only), then crop growth, then the bot's action.

pub mod action;
pub mod engine;
pub mod farmer;
pub mod grid;
pub mod protocol;
pub mod replay;
pub mod rules;

pub use action::Action;
pub use engine::{BotChannel, Engine, ReplyDeadlines};
pub use farmer::{Farmer, Shed};
pub use grid::{Cell, CellType, Grid, GridSnapshot, Soil};
pub use protocol::{Message, TickState};
pub use replay::{CycleRecord, Replay, TickRecord};
pub use rules::Rules;

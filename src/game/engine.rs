use std::time::Duration;

use tracing::{debug, info, instrument, trace};

use super::action::Action;
use super::farmer::{Farmer, Shed};
use super::grid::{Cell, Grid};
use super::protocol::{merge_changes, Message, TickState};
use super::replay::{CycleRecord, Replay, TickRecord};
use super::rules::Rules;

/// The engine's view of the bot: something that takes lines and maybe answers in time.
pub trait BotChannel {
    /// Deliver one line. A peer that went away must not make this fail.
    fn send(&mut self, line: &str);

    /// Wait at most `timeout` for the next line. `None` means nothing arrived in time (or the
    /// peer is gone), which the engine treats exactly like malformed input.
    fn receive(&mut self, timeout: Duration) -> Option<String>;
}

/// Deadlines applied to the bot's replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyDeadlines {
    /// for the display name, right after `init`
    pub handshake: Duration,
    pub tick: Duration,
}

impl Default for ReplyDeadlines {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(1),
            tick: Duration::from_millis(150),
        }
    }
}

/// Runs one full game against one bot.
#[derive(Debug, Clone)]
pub struct Engine {
    rules: Rules,
    seed: u64,
    grid: Grid,
    farmer: Farmer,
    shed: Shed,
    deadlines: ReplyDeadlines,
}

impl Engine {
    pub const UNKNOWN_BOT: &'static str = "UnknownBot";

    pub fn new(rules: Rules, seed: u64) -> Engine {
        Engine {
            grid: Grid::generate(&rules, seed),
            farmer: Farmer::new(&rules),
            shed: Shed::new(&rules),
            rules,
            seed,
            deadlines: ReplyDeadlines::default(),
        }
    }

    /// Engine on a grid drawn from a fresh random seed (recorded in the replay).
    pub fn with_random_seed(rules: Rules) -> Engine {
        Engine::new(rules, rand::random())
    }

    #[must_use]
    pub fn with_deadlines(self, deadlines: ReplyDeadlines) -> Self {
        Self { deadlines, ..self }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Play every cycle and return the replay.
    ///
    /// Never fails because of the bot: silence, garbage and illegal moves all resolve as waits.
    #[instrument(skip_all, fields(seed = self.seed))]
    pub fn run(mut self, bot: &mut impl BotChannel) -> Replay {
        let mut replay = Replay::new(self.seed, self.grid.snapshot());

        bot.send(
            &Message::Init {
                grid: self.grid.snapshot(),
            }
            .to_line(),
        );
        replay.bot_name = self.read_name(bot);
        info!(bot = %replay.bot_name, "bot ready");

        let mut pending = vec![];
        for cycle in 1..=self.rules.cycles {
            let record = self.run_cycle(cycle, &mut pending, bot);
            debug!(cycle, score = record.score, "cycle finished");
            replay.cycles.push(record);
        }

        bot.send(&Message::End.to_line());
        replay.finish();
        info!(final_score = replay.final_score, "run finished");
        replay
    }

    fn read_name(&self, bot: &mut impl BotChannel) -> String {
        let name = bot
            .receive(self.deadlines.handshake)
            .map(|raw| {
                raw.trim()
                    .chars()
                    .take(self.rules.max_name_len)
                    .collect::<String>()
            })
            .unwrap_or_default();
        if name.is_empty() {
            Self::UNKNOWN_BOT.to_string()
        } else {
            name
        }
    }

    /// `pending` holds the action changes of the last tick played, which the bot has not seen
    /// yet. It is carried across cycle boundaries.
    fn run_cycle(
        &mut self,
        cycle: u32,
        pending: &mut Vec<Cell>,
        bot: &mut impl BotChannel,
    ) -> CycleRecord {
        let reset = self.grid.reset_cycle();
        self.farmer.reset(&self.rules);
        self.shed.restock(&self.rules);
        *pending = merge_changes([&pending[..], &reset[..]]);

        let budget = self.rules.ap_per_cycle;
        let mut ap = budget;
        let mut score = 0;
        let mut ticks = vec![];

        while ap > 0 {
            let growth = self.grid.tick_growth(self.rules.ripe_after);

            let state = TickState {
                cycle,
                ap_remaining: ap,
                farmer: self.farmer,
                shed: self.shed,
                score_this_cycle: score,
                cell_changes: merge_changes([&pending[..], &growth[..]]),
            };
            bot.send(&Message::Tick(state).to_line());

            let raw = bot.receive(self.deadlines.tick);
            if raw.is_none() {
                trace!(cycle, ap, "no reply in time");
            }
            let action = Action::parse(raw.as_deref());

            let outcome = self
                .farmer
                .resolve(action, &mut self.grid, &mut self.shed, &self.rules);
            let ap_cost = outcome.cost.max(1).min(ap);
            ap -= ap_cost;
            score += outcome.score_delta;

            ticks.push(TickRecord {
                tick: budget - ap,
                ap_cost,
                ap_remaining: ap,
                farmer: self.farmer,
                action,
                cell_changes: merge_changes([&growth[..], &outcome.changes[..]]),
                score_this_cycle: score,
            });
            *pending = outcome.changes;
        }

        CycleRecord {
            cycle,
            score,
            ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replies from a fixed list, then stays silent.
    struct Canned {
        replies: VecDeque<Option<String>>,
        sent: Vec<String>,
    }

    impl BotChannel for Canned {
        fn send(&mut self, line: &str) {
            self.sent.push(line.to_string());
        }

        fn receive(&mut self, _timeout: Duration) -> Option<String> {
            self.replies.pop_front().flatten()
        }
    }

    fn canned(replies: &[Option<&str>]) -> Canned {
        Canned {
            replies: replies.iter().map(|r| r.map(str::to_string)).collect(),
            sent: vec![],
        }
    }

    #[test]
    fn name_is_trimmed_truncated_or_defaulted() {
        let rules = Rules::new().with_cycles(1).with_ap_per_cycle(1);
        let long = format!("  {}  ", "x".repeat(100));
        let replay = Engine::new(rules, 0).run(&mut canned(&[Some(&long)]));
        assert_eq!(replay.bot_name, "x".repeat(64));

        let replay = Engine::new(rules, 0).run(&mut canned(&[Some("   ")]));
        assert_eq!(replay.bot_name, Engine::UNKNOWN_BOT);

        let replay = Engine::new(rules, 0).run(&mut canned(&[None]));
        assert_eq!(replay.bot_name, Engine::UNKNOWN_BOT);
    }

    #[test]
    fn message_sequence() {
        let rules = Rules::new().with_cycles(2).with_ap_per_cycle(3);
        let mut bot = canned(&[Some("Seq")]);
        Engine::new(rules, 5).run(&mut bot);

        let kinds = bot
            .sent
            .iter()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["type"].clone())
            .collect::<Vec<_>>();
        let mut expected = vec![serde_json::json!("init")];
        expected.extend(std::iter::repeat(serde_json::json!("tick")).take(6));
        expected.push(serde_json::json!("end"));
        assert_eq!(kinds, expected);
    }

    #[test]
    fn last_tick_cost_is_capped_at_remaining_ap() {
        let rules = Rules::new().with_cycles(1).with_ap_per_cycle(4);
        let replies = [
            Some("Capped"),
            Some(r#"{"action":"wait"}"#),
            Some(r#"{"action":"get_seeds","n":10}"#),
        ];
        let replay = Engine::new(rules, 1).run(&mut canned(&replies));
        let ticks = &replay.cycles[0].ticks;
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].ap_cost, 3);
        assert_eq!(ticks[1].ap_remaining, 0);
        // the purchase goes through in full, only the charge is capped
        assert_eq!(ticks[1].farmer.seeds, 10);
    }
}

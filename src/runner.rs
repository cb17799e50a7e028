//! Entry point executed inside the isolated environment.
//!
//! The runner materializes the bot source, starts it behind a [`ProcessBridge`], plays one
//! full [`Engine`] run and prints exactly one JSON document on stdout: the [`Replay`], or
//! `{"error": "..."}`. Everything else (logs included) goes to stderr.
//!
//! Exit status is 1 when the bot could not even be started, 0 otherwise.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::{prelude::BASE64_STANDARD, Engine as _};
use tracing::{error, info, instrument, warn};

use crate::bridge::ProcessBridge;
use crate::configuration::Configuration;
use crate::game::{Engine, Replay, ReplyDeadlines, Rules};
use crate::sandbox::BOT_CODE_VAR;

/// Where the bot's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotSource {
    /// base64 text, as passed through [`BOT_CODE_VAR`]
    Encoded(String),
    File(PathBuf),
}

impl BotSource {
    /// [`BOT_CODE_VAR`] when set, else the first argument.
    pub fn from_env(mut args: impl Iterator<Item = String>) -> Option<BotSource> {
        match std::env::var(BOT_CODE_VAR) {
            Ok(code) => Some(BotSource::Encoded(code)),
            Err(_) => args.next().map(|path| BotSource::File(path.into())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub interpreter: String,
    pub source_extension: String,
    pub debug_bot_stderr: bool,
    pub deadlines: ReplyDeadlines,
    pub kill_grace: Duration,
    pub rules: Rules,
}

impl RunnerSettings {
    /// Interpreter and stderr flag from [`Configuration::from_env`], deadlines from
    /// `FARM_TICK_TIMEOUT_MS`, `FARM_HANDSHAKE_TIMEOUT_MS` and `FARM_KILL_GRACE_MS`.
    pub fn from_env() -> RunnerSettings {
        fn millis(var: &str, default: Duration) -> Duration {
            std::env::var(var)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        }

        let config = Configuration::from_env();
        let defaults = ReplyDeadlines::default();
        RunnerSettings {
            interpreter: config.interpreter().to_string(),
            source_extension: config.source_extension().to_string(),
            debug_bot_stderr: config.debug_bot_stderr(),
            deadlines: ReplyDeadlines {
                handshake: millis("FARM_HANDSHAKE_TIMEOUT_MS", defaults.handshake),
                tick: millis("FARM_TICK_TIMEOUT_MS", defaults.tick),
            },
            kill_grace: millis("FARM_KILL_GRACE_MS", ProcessBridge::DEFAULT_KILL_GRACE),
            rules: Rules::default(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        RunnerSettings {
            interpreter: Configuration::DEFAULT_INTERPRETER.to_string(),
            source_extension: Configuration::DEFAULT_SOURCE_EXTENSION.to_string(),
            debug_bot_stderr: false,
            deadlines: ReplyDeadlines::default(),
            kill_grace: ProcessBridge::DEFAULT_KILL_GRACE,
            rules: Rules::default(),
        }
    }
}

/// Write the source where the interpreter can read it and start the bot.
///
/// # Errors
///
/// Undecodable source, a missing file, or an interpreter that cannot be started.
#[instrument(skip_all)]
pub fn spawn_bot(settings: &RunnerSettings, source: BotSource) -> anyhow::Result<ProcessBridge> {
    let (path, temp) = match source {
        BotSource::Encoded(code) => {
            let bytes = BASE64_STANDARD
                .decode(code.trim())
                .context("Failed to decode bot code")?;
            let mut file = tempfile::Builder::new()
                .prefix("bot_")
                .suffix(&format!(".{}", settings.source_extension))
                .tempfile()
                .context("could not create bot source file")?;
            file.write_all(&bytes)
                .and_then(|_| file.flush())
                .context("could not write bot source file")?;
            let temp = file.into_temp_path();
            (temp.to_path_buf(), Some(temp))
        }
        BotSource::File(path) => {
            if !path.is_file() {
                bail!("bot file not found: {}", path.display());
            }
            (path, None)
        }
    };

    let envs = [("PYTHONUNBUFFERED".to_string(), "1".to_string())];
    let bridge = ProcessBridge::spawn(
        &settings.interpreter,
        &[path.to_string_lossy().into_owned()],
        &envs,
        settings.debug_bot_stderr,
    )
    .context("Failed to start bot")?
    .with_kill_grace(settings.kill_grace);
    Ok(match temp {
        Some(temp) => bridge.with_source(temp),
        None => bridge,
    })
}

/// Play one run. The bridge is shut down on every path, panics in the engine included.
///
/// # Errors
///
/// Only on an internal fault of the engine; bot misbehavior never fails a run.
pub fn play(
    settings: &RunnerSettings,
    mut bridge: ProcessBridge,
    seed: Option<u64>,
) -> anyhow::Result<Replay> {
    let engine = match seed {
        Some(seed) => Engine::new(settings.rules, seed),
        None => Engine::with_random_seed(settings.rules),
    }
    .with_deadlines(settings.deadlines);

    let outcome = catch_unwind(AssertUnwindSafe(|| engine.run(&mut bridge)));
    if let Err(e) = bridge.shutdown() {
        warn!("bot cleanup failed: {e:#}");
    }
    outcome.map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        anyhow::anyhow!("engine fault: {message}")
    })
}

/// `{"error": message}`
pub fn error_document(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

fn print_line(line: &str) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
        error!("could not write result: {e}");
    }
}

/// The whole runner: returns the process exit code.
pub fn main(args: impl Iterator<Item = String>) -> i32 {
    let settings = RunnerSettings::from_env();
    let Some(source) = BotSource::from_env(args) else {
        print_line(&error_document("No bot code provided"));
        return 1;
    };

    let bridge = match spawn_bot(&settings, source) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("{e:#}");
            print_line(&error_document(&format!("{e:#}")));
            return 1;
        }
    };
    info!(pid = bridge.id(), "bot started");

    let document = play(&settings, bridge, None).and_then(|replay| {
        serde_json::to_string(&replay).context("could not serialize replay")
    });
    match document {
        Ok(document) => print_line(&document),
        Err(e) => {
            error!("{e:#}");
            print_line(&error_document(&format!("{e:#}")));
        }
    }
    0
}

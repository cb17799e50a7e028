//! Play one bot on this machine, without any isolation.
//!
//! `farm-local <bot file> [--seed N] [--out replay.json]`

use std::path::PathBuf;

use anyhow::{bail, Context};
use farm_arena::logger::{init_logger, LogTarget};
use farm_arena::runner::{play, spawn_bot, BotSource, RunnerSettings};

struct Args {
    bot: PathBuf,
    seed: Option<u64>,
    out: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut bot = None;
    let mut seed = None;
    let mut out = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => {
                let value = args.next().context("--seed expects a value")?;
                seed = Some(value.parse().context("--seed expects an integer")?);
            }
            "--out" => out = Some(args.next().context("--out expects a path")?.into()),
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            path if bot.is_none() => bot = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument {extra}"),
        }
    }
    Ok(Args {
        bot: bot.context("usage: farm-local <bot file> [--seed N] [--out replay.json]")?,
        seed,
        out,
    })
}

fn main() -> anyhow::Result<()> {
    let settings = RunnerSettings::from_env();
    let target = if farm_arena::configuration::Configuration::from_env().log() {
        LogTarget::File
    } else {
        LogTarget::Stderr
    };
    init_logger(target)?;

    let args = parse_args(std::env::args().skip(1))?;
    let bridge = spawn_bot(&settings, BotSource::File(args.bot))?;
    let replay = play(&settings, bridge, args.seed)?;

    println!("Bot: {}", replay.bot_name);
    println!("Seed: {}", replay.seed);
    for (i, score) in replay.cycle_scores.iter().enumerate() {
        println!("Cycle {}: {score}g", i + 1);
    }
    println!("Final score: {}", replay.final_score);

    if let Some(out) = args.out {
        let file = std::fs::File::create(&out)
            .with_context(|| format!("could not create {}", out.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &replay)
            .context("could not write replay")?;
        println!("Replay written to {}", out.display());
    }
    Ok(())
}

use std::fs::File;

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Where [`init_logger`] sends events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// A timestamped `*_log.txt` file in the working directory, at trace level.
    File,
    /// Standard error, at info level. Standard output is left alone for results.
    Stderr,
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be created or a global subscriber is already set.
pub fn init_logger(target: LogTarget) -> anyhow::Result<()> {
    let (writer, level) = match target {
        LogTarget::File => {
            let file_name = get_log_file_name()?;
            let file = File::create(&file_name)
                .with_context(|| format!("could not create log file {file_name}"))?;
            (BoxMakeWriter::new(file), Level::TRACE)
        }
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), Level::INFO),
    };
    // the local offset is unknowable once threads are running; UTC then
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "Could not set global default tracing subscriber. Consider disabling logs if you are already setting a subscriber.",
    )
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(now.format(&format)?)
}

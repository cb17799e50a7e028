//! Error kinds at the two boundaries where callers need to tell failures apart.
//!
//! Misbehaving bots never produce errors: their input degrades to a wait inside the engine.

use std::time::Duration;

use thiserror::Error;

/// A run that could not produce a replay. The job ends in `error` with this message.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("could not build execution image: {0}")]
    ImageBuild(String),

    #[error("could not start isolated environment: {0}")]
    Launch(String),

    #[error("isolated environment exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("run exceeded wall-clock limit of {0:?}")]
    Timeout(Duration),

    #[error("run produced no output")]
    EmptyOutput,

    #[error("invalid replay document: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("{0}")]
    Reported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A submission refused before any job exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("provide either inline code or a source file")]
    MissingContent,

    #[error("bot source exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("only .{expected} files are accepted")]
    WrongExtension { expected: String },

    #[error("the scheduler is shut down")]
    Closed,
}

//! Isolated execution of one bot run.
//!
//! A [`Sandbox`] takes the bot's source, runs the runner binary (see [`crate::runner`]) on it
//! somewhere the bot cannot hurt the host, and hands back the runner's standard output. The
//! default [`Sandbox::run`] encodes the source, launches, and validates the output into a
//! [`Replay`].
//!
//! Two backends are provided:
//! - [`DockerSandbox`]: one throw-away container per run, no network, memory and CPU caps.
//! - [`LocalSandbox`]: the runner as a child process in its own cgroup (Linux), for hosts
//!   without a container runtime.

mod docker;
mod local;

pub use docker::DockerSandbox;
pub use local::LocalSandbox;

use base64::{prelude::BASE64_STANDARD, Engine as _};

use crate::error::SandboxError;
use crate::game::Replay;

/// Environment variable carrying the base64-encoded bot source into the sandbox.
pub const BOT_CODE_VAR: &str = "FARM_BOT_CODE";

/// Something that can run untrusted code with limits. Shared by every worker of the scheduler.
pub trait Sandbox: Send + Sync {
    /// Short backend name, for logs.
    fn name(&self) -> &'static str;

    /// Prepare whatever the backend reuses across runs. Idempotent: a no-op when everything is
    /// already there.
    fn ensure_image(&self) -> Result<(), SandboxError>;

    /// Run the runner on `encoded_source` (base64) inside a fresh environment and return its
    /// standard output. The environment is torn down before returning, whatever the outcome.
    fn launch(&self, encoded_source: &str) -> Result<String, SandboxError>;

    fn run(&self, source: &str) -> Result<Replay, SandboxError> {
        let encoded = BASE64_STANDARD.encode(source);
        let output = self.launch(&encoded)?;
        validate_output(&output)
    }
}

/// Turn the runner's standard output into a replay.
///
/// # Errors
///
/// Empty output, anything that is not a replay document, and an `{"error": ...}` document
/// without a score are all errors.
pub fn validate_output(output: &str) -> Result<Replay, SandboxError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(SandboxError::EmptyOutput);
    }
    let document: serde_json::Value = serde_json::from_str(output)?;
    if document.get("final_score").is_none() {
        if let Some(error) = document.get("error") {
            let message = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            return Err(SandboxError::Reported(message));
        }
    }
    Ok(serde_json::from_value(document)?)
}

/// Keep the end of a diagnostic stream; the start of a traceback is rarely the useful part.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        let skipped: String = text.chars().skip(count - max_chars).collect();
        format!("...{skipped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Engine, Rules};

    struct Silent;

    impl crate::game::BotChannel for Silent {
        fn send(&mut self, _line: &str) {}

        fn receive(&mut self, _timeout: std::time::Duration) -> Option<String> {
            None
        }
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(
            validate_output("  \n"),
            Err(SandboxError::EmptyOutput)
        ));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            validate_output("Traceback (most recent call last):"),
            Err(SandboxError::InvalidOutput(_))
        ));
        assert!(matches!(
            validate_output(r#"{"bot_name":"half"}"#),
            Err(SandboxError::InvalidOutput(_))
        ));
    }

    #[test]
    fn error_document_is_reported() {
        match validate_output(r#"{"error":"Failed to decode bot code"}"#) {
            Err(SandboxError::Reported(msg)) => assert_eq!(msg, "Failed to decode bot code"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn replay_document_is_accepted() {
        let rules = Rules::new().with_cycles(2).with_ap_per_cycle(3);
        let replay = Engine::new(rules, 9).run(&mut Silent);
        let printed = serde_json::to_string(&replay).unwrap();
        assert_eq!(validate_output(&printed).unwrap(), replay);
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("0123456789", 3), "...789");
    }
}

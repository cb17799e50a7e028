//! Config for the arena behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`]. Resource limits live in
//! [`crate::constraints`] instead.
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive, set them to `"true"` to enable them.
//!
//! - `FARM_LOG`: log to a timestamped file instead of stderr (default: `false`)
//! - `FARM_ALLOW_UNCONTAINED`: let the local sandbox run bots without a cgroup when cgroups are
//!   unavailable (default: `false`)
//! - `FARM_DEBUG_BOT_STDERR`: forward the bot's stderr instead of discarding it (default: `false`)
//! - `FARM_WORKERS`: number of concurrent evaluations (default: `4`)
//! - `FARM_IMAGE`: container image used by the docker sandbox (default: `farm-arena-runner`)
//! - `FARM_BUILD_CONTEXT`: directory the image is built from when missing (default: `.`)
//! - `FARM_INTERPRETER`: program that runs the bot source (default: `python3`)
//! - `FARM_MAX_SOURCE_BYTES`: largest accepted submission (default: `65536`)
//! - `FARM_SOURCE_EXTENSION`: required extension of uploaded files (default: `py`)

use std::path::PathBuf;

/// Configuration for arena behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_bot_stderr: bool,
    pub(crate) workers: usize,
    pub(crate) image: String,
    pub(crate) build_context: PathBuf,
    pub(crate) interpreter: String,
    pub(crate) max_source_bytes: usize,
    pub(crate) source_extension: String,
}

impl Configuration {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_IMAGE: &'static str = "farm-arena-runner";
    pub const DEFAULT_INTERPRETER: &'static str = "python3";
    pub const DEFAULT_MAX_SOURCE_BYTES: usize = 64 * 1024;
    pub const DEFAULT_SOURCE_EXTENSION: &'static str = "py";

    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Logs go to stderr.
    /// - Bots only run inside a container or cgroup.
    /// - Bot stderr is discarded.
    /// - Four evaluations run at once.
    pub fn new() -> Self {
        Self {
            log: false,
            allow_uncontained: false,
            debug_bot_stderr: false,
            workers: Self::DEFAULT_WORKERS,
            image: Self::DEFAULT_IMAGE.to_string(),
            build_context: PathBuf::from("."),
            interpreter: Self::DEFAULT_INTERPRETER.to_string(),
            max_source_bytes: Self::DEFAULT_MAX_SOURCE_BYTES,
            source_extension: Self::DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }

    /// Create configuration from environment variables. See the [module documentation](self).
    ///
    /// Any unset or unparsable value falls back to the default.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::new();
        Self {
            log: get_env_flag("FARM_LOG", defaults.log),
            allow_uncontained: get_env_flag("FARM_ALLOW_UNCONTAINED", defaults.allow_uncontained),
            debug_bot_stderr: get_env_flag("FARM_DEBUG_BOT_STDERR", defaults.debug_bot_stderr),
            workers: get_env("FARM_WORKERS", defaults.workers).max(1),
            image: get_env("FARM_IMAGE", defaults.image),
            build_context: get_env("FARM_BUILD_CONTEXT", defaults.build_context),
            interpreter: get_env("FARM_INTERPRETER", defaults.interpreter),
            max_source_bytes: get_env("FARM_MAX_SOURCE_BYTES", defaults.max_source_bytes),
            source_extension: get_env("FARM_SOURCE_EXTENSION", defaults.source_extension)
                .trim_start_matches('.')
                .to_string(),
        }
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable running bots without a cgroup.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable bot stderr output (debug purposes only).
    pub fn with_debug_bot_stderr(mut self, value: bool) -> Self {
        self.debug_bot_stderr = value;
        self
    }

    /// Number of worker threads. At least one worker is always started.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_build_context(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_context = dir.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn log(&self) -> bool {
        self.log
    }

    pub fn allow_uncontained(&self) -> bool {
        self.allow_uncontained
    }

    pub fn debug_bot_stderr(&self) -> bool {
        self.debug_bot_stderr
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn build_context(&self) -> &std::path::Path {
        &self.build_context
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn max_source_bytes(&self) -> usize {
        self.max_source_bytes
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Configuration::new()
            .with_workers(0)
            .with_source_extension(".rb")
            .with_image("custom");
        assert_eq!(config.workers(), 1);
        assert_eq!(config.source_extension(), "rb");
        assert_eq!(config.image(), "custom");
        assert_eq!(config.max_source_bytes(), 65536);
        assert!(!config.allow_uncontained());
    }
}

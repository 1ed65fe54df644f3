//! Subscriber installation for applications embedding the engine.

use crate::errors::StagecraftError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

/// Configuration of the global `tracing` subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info",
    /// "stagecraft=debug").
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Include the event target (module path) in each line.
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl LoggingConfig {
    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Sets whether targets are printed.
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn filter(&self) -> Result<EnvFilter, StagecraftError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| StagecraftError::Config(format!("invalid log level '{}': {e}", self.level))),
        }
    }
}

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over [`LoggingConfig::level`].
///
/// # Errors
///
/// Returns [`StagecraftError::Config`] if the level directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), StagecraftError> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| StagecraftError::Config(format!("could not install subscriber: {e}")))
}

//! Logging setup.
//!
//! Library crates only emit `tracing` events; nothing in them installs a
//! subscriber. The binary builds a [`LogConfig`] and hands it to
//! [`init_logging`] once at startup, so tests and embedders stay free to pick
//! their own subscriber (or none).

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Log targets used across the engine.
pub mod targets {
    /// Application lifecycle: window, bring-up, frame loop, teardown.
    pub const APP: &str = "cryptic::app";
    /// Messages forwarded from the Vulkan validation layers.
    pub const VULKAN: &str = "cryptic::vulkan";
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// Emit ANSI colors.
    pub ansi: bool,
    /// Print the event target next to each message.
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            ansi: true,
            show_target: true,
        }
    }
}

impl LogConfig {
    /// Set the fallback filter directives.
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Build the filter, preferring `RUST_LOG` over the configured default.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_filter)
                .map_err(|e| Error::Logging(format!("bad filter '{}': {e}", self.default_filter))),
        }
    }
}

/// Install the global `fmt` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_ansi(config.ansi)
        .with_target(config.show_target)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_filter, "info");
        assert!(config.ansi);
        assert!(config.show_target);
    }

    #[test]
    fn builder_overrides() {
        let config = LogConfig::default()
            .with_default_filter("cryptic::vulkan=trace")
            .with_ansi(false);
        assert_eq!(config.default_filter, "cryptic::vulkan=trace");
        assert!(!config.ansi);
    }

    #[test]
    fn targets_are_namespaced() {
        assert!(targets::APP.starts_with("cryptic::"));
        assert!(targets::VULKAN.starts_with("cryptic::"));
        assert_ne!(targets::APP, targets::VULKAN);
    }
}

//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Logging could not be initialized
    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

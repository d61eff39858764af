//! Application framework for the Cryptic engine.
//!
//! Opens a fixed-size window, brings Vulkan up for it and runs the frame
//! loop from the event loop until the window closes.
//!
//! # Example
//!
//! ```no_run
//! use cryptic_app::{run_app, AppConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     cryptic_core::init_logging(&config.log)?;
//!     run_app(config)
//! }
//! ```

mod context;
mod runner;
mod stats;

pub use context::AppContext;
pub use runner::{run_app, AppConfig, VALIDATION_ENV};
pub use stats::FrameStats;

// Re-export commonly used types for convenience
pub use cryptic_core::LogConfig;
pub use cryptic_gpu::{FrameStatus, PresentPolicy};

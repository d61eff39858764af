//! Core constants, error types and logging for the Cryptic engine.
//!
//! This crate provides the pieces every other crate leans on:
//! - Engine-wide constants (frames in flight, default window)
//! - The core error type
//! - Logging setup and log targets

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig};

/// Engine-wide constants
pub mod constants {
    /// Number of frames the CPU may record ahead of the GPU.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Default window title, also used as the Vulkan application name.
    pub const WINDOW_TITLE: &str = "Vulkan Testing";
    /// Default window width in pixels.
    pub const WINDOW_WIDTH: u32 = 1280;
    /// Default window height in pixels.
    pub const WINDOW_HEIGHT: u32 = 720;
    /// Engine name reported to the Vulkan driver.
    pub const ENGINE_NAME: &str = "Cryptic Engine";
}

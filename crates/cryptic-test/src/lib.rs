//! Test harness for the Cryptic engine.
//!
//! Provides a fake GPU so the frame loop can be driven and inspected
//! without a Vulkan device.

pub mod harness;

pub use harness::{Acquire, Call, FakeGpu, GpuTiming};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] cryptic_gpu::GpuError),
    #[error("Synchronization violated: {0}")]
    Violations(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

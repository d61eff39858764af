//! Vulkan bring-up and frame scheduling for the Cryptic engine.
//!
//! This crate provides:
//! - Instance creation with optional validation and debug messenger
//! - Surface, physical device selection and logical device creation
//! - Swapchain, render pass, framebuffers and the triangle pipeline
//! - Command buffer recording
//! - The [`FrameScheduler`] that paces frames in flight

pub mod command;
pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use command::{record_triangle, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use device::{PhysicalDeviceInfo, QueueFamilies, QueueFamilyIndices};
pub use error::{GpuError, Result};
pub use frame::{FrameDevice, FrameScheduler, FrameStatus, PresentPolicy, VulkanFrameDevice};
pub use instance::Instance;
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::{Framebuffers, RenderPass};
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::Swapchain;
pub use sync::FrameSlot;

/// Re-exported so dependents can name Vulkan handles without a direct `ash`
/// dependency.
pub use ash::vk;

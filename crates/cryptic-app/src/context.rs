//! Application context.

use std::sync::Arc;

use ash::vk;
use cryptic_core::logging::targets;
use cryptic_gpu::command::record_triangle;
use cryptic_gpu::{
    CommandPool, FrameScheduler, FrameStatus, Framebuffers, GpuContext, GpuContextBuilder,
    GraphicsPipeline, GraphicsPipelineConfig, RenderPass, Swapchain, VulkanFrameDevice,
};
use winit::window::Window;

use crate::runner::AppConfig;

/// Every GPU object the triangle needs, in teardown order.
///
/// Fields drop top to bottom, so each object goes before whatever it was
/// created from. The scheduler is destroyed explicitly first because it needs
/// the device drained.
pub struct AppContext {
    scheduler: Option<FrameScheduler>,
    #[allow(dead_code)]
    command_pool: CommandPool,
    #[allow(dead_code)]
    framebuffers: Framebuffers,
    #[allow(dead_code)]
    pipeline: GraphicsPipeline,
    #[allow(dead_code)]
    render_pass: RenderPass,
    swapchain: Swapchain,
    gpu: GpuContext,
    /// The surface borrows the window, so it goes last.
    #[allow(dead_code)]
    window: Arc<Window>,
}

impl AppContext {
    /// Bring up Vulkan for the window and record the triangle.
    ///
    /// On failure everything created so far is released before returning.
    pub fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        // SAFETY: the context stores the window and drops it last
        let gpu = unsafe {
            GpuContextBuilder::new()
                .app_name(&config.title)
                .validation(config.validation)
                .build(window.as_ref())?
        };
        tracing::info!(
            target: targets::APP,
            "Using {} (validation {})",
            gpu.device_name(),
            if gpu.instance().validation_enabled() { "on" } else { "off" }
        );

        let size = window.inner_size();
        let desired_extent = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let swapchain = gpu.create_swapchain(desired_extent, config.vsync)?;

        // SAFETY: every handle below comes from `gpu` and `swapchain`
        let render_pass = unsafe { RenderPass::new(gpu.device_arc(), swapchain.format)? };
        let framebuffers = unsafe {
            Framebuffers::new(
                gpu.device_arc(),
                render_pass.render_pass,
                &swapchain.image_views,
                swapchain.extent,
            )?
        };

        let pipeline_config = GraphicsPipelineConfig::new(
            cryptic_shaders::triangle_vertex_shader(),
            cryptic_shaders::triangle_fragment_shader(),
            swapchain.extent,
        );
        let pipeline = unsafe {
            GraphicsPipeline::new(gpu.device_arc(), render_pass.render_pass, &pipeline_config)?
        };

        let command_pool = unsafe {
            CommandPool::new(
                gpu.device_arc(),
                gpu.queue_families().graphics,
                vk::CommandPoolCreateFlags::empty(),
            )?
        };
        let image_count = u32::try_from(swapchain.image_count())?;
        let command_buffers = command_pool.allocate_command_buffers(image_count)?;
        unsafe {
            record_triangle(
                gpu.device(),
                &command_buffers,
                framebuffers.as_slice(),
                render_pass.render_pass,
                pipeline.pipeline,
                swapchain.extent,
            )?;
        }

        let scheduler: FrameScheduler = {
            let device = frame_device(&gpu, &swapchain);
            FrameScheduler::new(&device, command_buffers)?.with_present_policy(config.present_policy)
        };
        tracing::debug!(
            target: targets::APP,
            "{} frames in flight, present policy {:?}",
            scheduler.frames_in_flight(),
            scheduler.present_policy()
        );

        Ok(Self {
            scheduler: Some(scheduler),
            command_pool,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            gpu,
            window,
        })
    }

    /// Run one iteration of the frame loop.
    pub fn run_frame(&mut self) -> cryptic_gpu::Result<FrameStatus> {
        let scheduler = self.scheduler.as_mut().ok_or_else(|| {
            cryptic_gpu::GpuError::InvalidState("frame loop already shut down".into())
        })?;
        let device = frame_device(&self.gpu, &self.swapchain);
        scheduler.run_frame(&device)
    }

    /// Drain the device and destroy the frame slots.
    ///
    /// Idempotent; the remaining objects are released on drop.
    pub fn shutdown(&mut self) -> cryptic_gpu::Result<()> {
        let Some(scheduler) = self.scheduler.take() else {
            return Ok(());
        };
        let frames = scheduler.frame_count();
        let device = frame_device(&self.gpu, &self.swapchain);
        scheduler.destroy(&device)?;
        tracing::debug!(target: targets::APP, "Frame loop shut down after {frames} frames");
        Ok(())
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(target: targets::APP, "Frame loop teardown failed: {e}");
        }
    }
}

fn frame_device<'a>(gpu: &'a GpuContext, swapchain: &'a Swapchain) -> VulkanFrameDevice<'a> {
    // SAFETY: queues and swapchain were all created from this context's device
    unsafe {
        VulkanFrameDevice::new(
            gpu.device(),
            gpu.graphics_queue(),
            gpu.present_queue(),
            swapchain,
        )
    }
}

//! Render pass and swapchain framebuffers.

use std::sync::Arc;

use ash::vk;

use crate::error::Result;

/// Single-subpass render pass writing one color attachment that is handed
/// to the presentation engine afterwards.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: Arc<ash::Device>,
}

impl RenderPass {
    /// Create a render pass for the given swapchain format.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: Arc<ash::Device>, color_format: vk::Format) -> Result<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        // The layout transition must not start before the acquire semaphore,
        // which is waited on at COLOR_ATTACHMENT_OUTPUT.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: caller guarantees the device is valid
        let render_pass = unsafe { device.create_render_pass(&create_info, None)? };

        Ok(Self {
            render_pass,
            device,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // SAFETY: pipelines and framebuffers using the pass are dropped first
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// One framebuffer per swapchain image view.
pub struct Framebuffers {
    framebuffers: Vec<vk::Framebuffer>,
    device: Arc<ash::Device>,
}

impl Framebuffers {
    /// # Safety
    /// The image views must be compatible with `render_pass` and sized
    /// `extent`.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut this = Self {
            framebuffers: Vec::with_capacity(image_views.len()),
            device,
        };

        for &view in image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            // SAFETY: caller guarantees compatibility; earlier framebuffers
            // are released by drop if this fails
            let framebuffer = unsafe { this.device.create_framebuffer(&create_info, None)? };
            this.framebuffers.push(framebuffer);
        }

        Ok(this)
    }

    /// One framebuffer per swapchain image, indexed by image.
    pub fn as_slice(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for &framebuffer in &self.framebuffers {
            // SAFETY: command buffers referencing these are idle by now
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

//! GPU context management.

use std::sync::Arc;

use ash::vk;
use cryptic_core::constants::WINDOW_TITLE;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::device::{create_device, select_physical_device, QueueFamilies};
use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::surface::{Surface, SurfaceSupport};
use crate::swapchain::Swapchain;

/// Instance, surface, device and queues for one window.
///
/// Objects created from the device hold a clone of [`device_arc`] and must be
/// dropped before the context.
///
/// [`device_arc`]: GpuContext::device_arc
pub struct GpuContext {
    physical_device: vk::PhysicalDevice,
    device_name: String,
    device: Arc<ash::Device>,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    // Dropped after the device is destroyed, surface before instance
    surface: Surface,
    instance: Instance,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device, for objects that destroy themselves.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Name of the selected GPU.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the graphics and present queue family indices.
    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Get the instance wrapper.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the window surface.
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Query surface support on the selected device.
    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        self.surface.support(self.physical_device)
    }

    /// Create a swapchain for the window surface.
    pub fn create_swapchain(&self, desired_extent: vk::Extent2D, vsync: bool) -> Result<Swapchain> {
        let support = self.surface_support()?;
        let loader = ash::khr::swapchain::Device::new(self.instance.handle(), &self.device);

        // SAFETY: device, surface and support all belong to this context
        let swapchain = unsafe {
            Swapchain::new(
                self.device_arc(),
                loader,
                self.surface.surface,
                &support,
                &self.queue_families,
                desired_extent,
                vsync,
            )?
        };

        tracing::info!(
            "Swapchain: {} images, {:?}, {}x{}, {:?}",
            swapchain.image_count(),
            swapchain.format,
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.present_mode
        );
        Ok(swapchain)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        let users = Arc::strong_count(&self.device);
        if users > 1 {
            tracing::warn!("Destroying device while {} other owners still hold it", users - 1);
        }

        // SAFETY: child objects were dropped before the context
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("device_wait_idle failed during teardown: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: WINDOW_TITLE.to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for a window.
    ///
    /// Anything created before a failing step is released again.
    ///
    /// # Safety
    /// The window must outlive the returned context.
    pub unsafe fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

        let instance = Instance::new(&self.app_name, display.as_raw(), self.enable_validation)?;

        // SAFETY: caller keeps the window alive
        let surface = unsafe { Surface::from_window(&instance, window)? };

        // SAFETY: surface was created from this instance
        let selected = unsafe { select_physical_device(instance.handle(), &surface)? };
        tracing::info!(
            "Selected GPU: {} ({:?}), graphics family {}, present family {}",
            selected.name,
            selected.device_type,
            selected.families.graphics,
            selected.families.present
        );

        // SAFETY: physical device was enumerated from this instance
        let (device, graphics_queue, present_queue) =
            unsafe { create_device(instance.handle(), selected.handle, &selected.families)? };

        Ok(GpuContext {
            physical_device: selected.handle,
            device_name: selected.name,
            device: Arc::new(device),
            queue_families: selected.families,
            graphics_queue,
            present_queue,
            surface,
            instance,
        })
    }
}

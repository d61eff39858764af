//! Frame pacing: N frames in flight over M swapchain images.
//!
//! [`FrameScheduler`] owns the steady-state loop. Each call to
//! [`FrameScheduler::run_frame`] waits for the current slot's previous work,
//! acquires an image, waits out any other slot still rendering to that image,
//! submits the image's pre-recorded command buffer and presents it. Slots
//! rotate round-robin regardless of which image the swapchain hands back.
//!
//! The scheduler only reaches the GPU through [`FrameDevice`], which the
//! Vulkan backend ([`VulkanFrameDevice`]) and test doubles both implement.

use ash::vk;
use cryptic_core::constants::MAX_FRAMES_IN_FLIGHT;

use crate::command::submit_command_buffers;
use crate::error::{GpuError, Result};
use crate::swapchain::Swapchain;
use crate::sync::{self, FrameSlot};

/// Device operations the frame loop needs.
///
/// All waits are unbounded.
pub trait FrameDevice {
    /// Create an unsignaled binary semaphore.
    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    /// Create a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;

    /// Block until the fence is signaled.
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;

    /// Return the fence to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    /// Acquire the next presentable image, signaling `signal` once it is
    /// ready. Returns the image index and whether the swapchain is
    /// suboptimal.
    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<(u32, bool)>;

    /// Submit one command buffer to the graphics queue.
    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;

    /// Queue an image for presentation once `wait` is signaled. Returns
    /// whether the swapchain is suboptimal.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool>;

    /// Block until all queues are idle.
    fn wait_idle(&self) -> Result<()>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn destroy_fence(&self, fence: vk::Fence);
}

/// [`FrameDevice`] backed by a Vulkan device and swapchain.
pub struct VulkanFrameDevice<'a> {
    device: &'a ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain: &'a Swapchain,
}

impl<'a> VulkanFrameDevice<'a> {
    /// # Safety
    /// The queues must belong to `device`, the swapchain must have been
    /// created on it, and `present_queue` must be able to present to the
    /// swapchain's surface.
    pub unsafe fn new(
        device: &'a ash::Device,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        swapchain: &'a Swapchain,
    ) -> Self {
        Self {
            device,
            graphics_queue,
            present_queue,
            swapchain,
        }
    }
}

// SAFETY (all methods): handle validity was vouched for in `new`, and the
// scheduler only passes handles it created through this device.
impl FrameDevice for VulkanFrameDevice<'_> {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        unsafe { sync::create_semaphore(self.device) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        unsafe { sync::create_fence(self.device, signaled) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { sync::wait_for_fence(self.device, fence, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { sync::reset_fence(self.device, fence) }
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<(u32, bool)> {
        unsafe { self.swapchain.acquire_next_image(signal, u64::MAX) }
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        unsafe {
            submit_command_buffers(
                self.device,
                self.graphics_queue,
                &[command_buffer],
                &[wait],
                &[wait_stage],
                &[signal],
                fence,
            )
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        unsafe { self.swapchain.present(self.present_queue, image_index, &[wait]) }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }
}

/// What to do when presenting a frame fails for a reason other than an
/// out-of-date swapchain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Log a warning and carry on with the next frame.
    #[default]
    Skip,
    /// Return the error to the caller.
    Propagate,
}

impl std::str::FromStr for PresentPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "propagate" => Ok(Self::Propagate),
            other => Err(format!("unknown present policy '{other}' (expected skip or propagate)")),
        }
    }
}

/// Outcome of one [`FrameScheduler::run_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatus {
    /// Slot the frame ran in.
    pub slot: usize,
    /// Swapchain image that was rendered.
    pub image_index: u32,
    /// Zero-based count of frames submitted before this one.
    pub frame_number: u64,
    /// Acquire or present reported a suboptimal swapchain.
    pub suboptimal: bool,
    /// The image reached the presentation engine.
    pub presented: bool,
}

/// Drives `N` frames in flight over the swapchain's images.
///
/// Invariants:
/// - the active slot advances by exactly one (mod `N`) per submitted frame
/// - a command buffer is never resubmitted while its last submission is
///   pending, since the image's previous fence is waited on first
///
/// Must be torn down with [`destroy`](Self::destroy); dropping it without
/// doing so leaks the slot objects.
#[derive(Debug)]
pub struct FrameScheduler<const N: usize = MAX_FRAMES_IN_FLIGHT> {
    slots: Vec<FrameSlot>,
    /// Fence of the slot that last submitted work for each image.
    image_fences: Vec<Option<vk::Fence>>,
    command_buffers: Vec<vk::CommandBuffer>,
    current_slot: usize,
    frame_count: u64,
    present_policy: PresentPolicy,
}

impl<const N: usize> FrameScheduler<N> {
    /// Create the frame slots.
    ///
    /// `command_buffers` holds one recorded command buffer per swapchain
    /// image, indexed by image.
    pub fn new<D: FrameDevice + ?Sized>(
        device: &D,
        command_buffers: Vec<vk::CommandBuffer>,
    ) -> Result<Self> {
        if N == 0 {
            return Err(GpuError::InvalidState(
                "at least one frame in flight is required".into(),
            ));
        }
        if command_buffers.is_empty() {
            return Err(GpuError::InvalidState(
                "no command buffers to schedule".into(),
            ));
        }

        let mut slots = Vec::with_capacity(N);
        for _ in 0..N {
            match FrameSlot::new(device) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    // Nothing has been submitted yet
                    for slot in slots {
                        slot.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            "Frame scheduler ready: {} frames in flight over {} images",
            N,
            command_buffers.len()
        );

        Ok(Self {
            slots,
            image_fences: vec![None; command_buffers.len()],
            command_buffers,
            current_slot: 0,
            frame_count: 0,
            present_policy: PresentPolicy::default(),
        })
    }

    /// Set how present failures are handled.
    #[must_use]
    pub fn with_present_policy(mut self, policy: PresentPolicy) -> Self {
        self.present_policy = policy;
        self
    }

    /// Render and present one frame.
    ///
    /// Blocks while the current slot's previous frame is still on the GPU,
    /// and while another slot is still rendering to the acquired image.
    ///
    /// On [`GpuError::SwapchainOutOfDate`] from acquire nothing was
    /// submitted and the slot is unchanged; from present the slot has
    /// already advanced.
    ///
    /// An error between a successful acquire and the submit (image index out
    /// of range, a failed collision wait, reset or submit) leaves the slot's
    /// image-available semaphore with a signal nothing will wait on. Acquiring
    /// with it again is invalid, so after such an error the only valid call
    /// is [`destroy`](Self::destroy).
    pub fn run_frame<D: FrameDevice + ?Sized>(&mut self, device: &D) -> Result<FrameStatus> {
        let slot_index = self.current_slot;
        let slot = *self
            .slots
            .get(slot_index)
            .ok_or_else(|| GpuError::InvalidState("frame slots already destroyed".into()))?;

        device.wait_for_fence(slot.in_flight)?;

        // The fence stays signaled until the reset below, so a failed acquire
        // leaves the next call free to pass the wait above.
        let (image_index, acquire_suboptimal) = device.acquire_next_image(slot.image_available)?;
        let image = image_index as usize;
        if image >= self.command_buffers.len() {
            return Err(GpuError::InvalidState(format!(
                "acquired image {image_index} but the swapchain has {} images",
                self.command_buffers.len()
            )));
        }

        if let Some(fence) = self.image_fences[image] {
            if fence != slot.in_flight {
                tracing::trace!("Image {image_index} still in use by another frame, waiting");
                device.wait_for_fence(fence)?;
            }
        }
        self.image_fences[image] = Some(slot.in_flight);

        device.reset_fence(slot.in_flight)?;
        device.submit(
            self.command_buffers[image],
            slot.image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            slot.render_finished,
            slot.in_flight,
        )?;

        let present = device.present(image_index, slot.render_finished);

        // Work was submitted with this slot's fence, so the rotation must
        // happen whatever present returned.
        let frame_number = self.frame_count;
        self.frame_count += 1;
        self.current_slot = (slot_index + 1) % N;

        let (present_suboptimal, presented) = match present {
            Ok(suboptimal) => (suboptimal, true),
            Err(GpuError::SwapchainOutOfDate) => return Err(GpuError::SwapchainOutOfDate),
            Err(e) => match self.present_policy {
                PresentPolicy::Skip => {
                    tracing::warn!("Frame {frame_number}: present failed, skipping: {e}");
                    (false, false)
                }
                PresentPolicy::Propagate => return Err(e),
            },
        };

        Ok(FrameStatus {
            slot: slot_index,
            image_index,
            frame_number,
            suboptimal: acquire_suboptimal || present_suboptimal,
            presented,
        })
    }

    /// Drain the device, then destroy every slot.
    ///
    /// If the device cannot be drained the slot objects are leaked rather
    /// than destroyed while possibly in use, and the error is returned.
    pub fn destroy<D: FrameDevice + ?Sized>(mut self, device: &D) -> Result<()> {
        if let Err(e) = device.wait_idle() {
            tracing::error!(
                "Device did not go idle, leaking {} frame slots: {e}",
                self.slots.len()
            );
            self.slots.clear();
            return Err(e);
        }

        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
        self.image_fences.fill(None);
        Ok(())
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of frames in flight.
    pub const fn frames_in_flight(&self) -> usize {
        N
    }

    /// Number of swapchain images being scheduled.
    pub fn image_count(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn present_policy(&self) -> PresentPolicy {
        self.present_policy
    }

    /// Synchronization objects of a slot.
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Fence of the slot that last rendered to an image, if any.
    pub fn image_fence(&self, image_index: usize) -> Option<vk::Fence> {
        self.image_fences.get(image_index).copied().flatten()
    }
}

impl<const N: usize> Drop for FrameScheduler<N> {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            tracing::warn!(
                "FrameScheduler dropped without destroy(), {} frame slots leaked",
                self.slots.len()
            );
        }
    }
}

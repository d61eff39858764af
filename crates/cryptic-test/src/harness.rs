//! In-process fake GPU for exercising the frame loop without a device.
//!
//! [`FakeGpu`] implements [`FrameDevice`] with plain bookkeeping: fences and
//! semaphores are counters, submissions sit in a queue until they "finish"
//! according to a [`GpuTiming`], and every call is appended to a log. Misuse
//! that real Vulkan would punish (resubmitting a pending command buffer,
//! resetting or destroying objects that pending work still uses, waiting on a
//! semaphore nothing signals, signaling one that already has a pending
//! signal) is recorded as a violation instead of crashing, so tests can
//! assert there were none.

use std::collections::{HashMap, HashSet, VecDeque};

use ash::vk::{self, Handle};
use cryptic_gpu::{FrameDevice, GpuError, Result as GpuResult};
use parking_lot::{Condvar, Mutex};

use crate::{Result, TestError};

/// When submitted work completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTiming {
    /// Work is done by the time `submit` returns.
    Instant,
    /// Work completes the moment the CPU waits on its fence.
    OnWait,
    /// Work completes only through [`FakeGpu::complete_next`] or
    /// [`FakeGpu::complete_all`]; fence waits block until then.
    Manual,
}

/// Scripted outcome of one acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    Suboptimal(u32),
    Error(vk::Result),
}

/// One recorded device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    CreateSemaphore(vk::Semaphore),
    CreateFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    /// `image` is `None` when the acquire failed.
    Acquire {
        signal: vk::Semaphore,
        image: Option<u32>,
    },
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        image: u32,
        wait: vk::Semaphore,
    },
    WaitIdle,
    DestroySemaphore(vk::Semaphore),
    DestroyFence(vk::Fence),
}

#[derive(Debug, Clone, Copy)]
struct Submission {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

#[derive(Debug, Clone, Copy, Default)]
struct FenceState {
    signaled: bool,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct Failures {
    fence_creation: bool,
    wait: Option<vk::Result>,
    submit: Option<vk::Result>,
    wait_idle: Option<vk::Result>,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u64,
    fences: HashMap<vk::Fence, FenceState>,
    fence_order: Vec<vk::Fence>,
    semaphores: HashMap<vk::Semaphore, bool>,
    semaphore_order: Vec<vk::Semaphore>,
    /// Binary semaphores with a signal no wait has consumed yet.
    signaled_semaphores: HashSet<vk::Semaphore>,
    command_buffers: Vec<vk::CommandBuffer>,
    pending: VecDeque<Submission>,
    acquires: VecDeque<Acquire>,
    next_image: u32,
    presents: VecDeque<GpuResult<bool>>,
    failures: Failures,
    blocked_on: Option<vk::Fence>,
    calls: Vec<Call>,
    violations: Vec<String>,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn signal(&mut self, fence: vk::Fence) {
        if let Some(state) = self.fences.get_mut(&fence) {
            state.signaled = true;
        }
    }

    /// Finish every pending submission that signals `fence`, plus anything
    /// queued before it (queue work completes in order).
    fn complete_through(&mut self, fence: vk::Fence) {
        let Some(last) = self.pending.iter().rposition(|s| s.fence == fence) else {
            return;
        };
        for submission in self.pending.drain(..=last).collect::<Vec<_>>() {
            self.signal(submission.fence);
        }
    }

    fn complete_all(&mut self) {
        while let Some(submission) = self.pending.pop_front() {
            self.signal(submission.fence);
        }
    }

    fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence).is_some_and(|f| f.signaled)
    }

    fn fence_name(&self, fence: vk::Fence) -> String {
        self.fence_order
            .iter()
            .position(|&f| f == fence)
            .map_or_else(|| format!("{fence:?}"), |i| format!("fence{i}"))
    }

    fn semaphore_name(&self, semaphore: vk::Semaphore) -> String {
        self.semaphore_order
            .iter()
            .position(|&s| s == semaphore)
            .map_or_else(|| format!("{semaphore:?}"), |i| format!("sem{i}"))
    }

    fn command_buffer_name(&self, cmd: vk::CommandBuffer) -> String {
        self.command_buffers
            .iter()
            .position(|&c| c == cmd)
            .map_or_else(|| format!("{cmd:?}"), |i| format!("cmd{i}"))
    }

    fn describe(&self, call: &Call) -> String {
        match *call {
            Call::CreateSemaphore(s) => format!("create {}", self.semaphore_name(s)),
            Call::CreateFence(f) => format!("create {}", self.fence_name(f)),
            Call::WaitFence(f) => format!("wait {}", self.fence_name(f)),
            Call::ResetFence(f) => format!("reset {}", self.fence_name(f)),
            Call::Acquire {
                signal,
                image: Some(image),
            } => format!("acquire image{image} signal {}", self.semaphore_name(signal)),
            Call::Acquire { image: None, .. } => "acquire failed".to_string(),
            Call::Submit {
                command_buffer,
                wait,
                signal,
                fence,
                ..
            } => format!(
                "submit {} wait {} signal {} {}",
                self.command_buffer_name(command_buffer),
                self.semaphore_name(wait),
                self.semaphore_name(signal),
                self.fence_name(fence)
            ),
            Call::Present { image, wait } => {
                format!("present image{image} wait {}", self.semaphore_name(wait))
            }
            Call::WaitIdle => "wait idle".to_string(),
            Call::DestroySemaphore(s) => format!("destroy {}", self.semaphore_name(s)),
            Call::DestroyFence(f) => format!("destroy {}", self.fence_name(f)),
        }
    }
}

/// Scriptable fake device.
pub struct FakeGpu {
    timing: GpuTiming,
    image_count: u32,
    state: Mutex<State>,
    completed: Condvar,
}

impl FakeGpu {
    /// A fake swapchain with `image_count` images, acquired round-robin
    /// unless scripted otherwise.
    pub fn new(image_count: u32, timing: GpuTiming) -> Self {
        Self {
            timing,
            image_count,
            state: Mutex::new(State::default()),
            completed: Condvar::new(),
        }
    }

    pub fn timing(&self) -> GpuTiming {
        self.timing
    }

    /// One command buffer per image, named `cmd0..` in traces.
    pub fn command_buffers(&self) -> Vec<vk::CommandBuffer> {
        let mut state = self.state.lock();
        let buffers: Vec<_> = (0..self.image_count)
            .map(|_| vk::CommandBuffer::from_raw(state.handle()))
            .collect();
        state.command_buffers.extend(&buffers);
        buffers
    }

    /// Queue acquire outcomes; once exhausted, images rotate round-robin.
    pub fn script_acquires(&self, acquires: impl IntoIterator<Item = Acquire>) {
        self.state.lock().acquires.extend(acquires);
    }

    /// Queue the image indices the next acquires return.
    pub fn script_images(&self, images: impl IntoIterator<Item = u32>) {
        self.script_acquires(images.into_iter().map(Acquire::Image));
    }

    /// Queue present outcomes; once exhausted, presents succeed.
    pub fn script_presents(&self, presents: impl IntoIterator<Item = GpuResult<bool>>) {
        self.state.lock().presents.extend(presents);
    }

    /// Make the next fence creation fail.
    pub fn fail_next_fence_creation(&self) {
        self.state.lock().failures.fence_creation = true;
    }

    /// Make the next fence wait fail with `result`.
    pub fn fail_next_wait(&self, result: vk::Result) {
        self.state.lock().failures.wait = Some(result);
    }

    /// Make the next submit fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.lock().failures.submit = Some(result);
    }

    /// Make the next wait-idle fail with `result`.
    pub fn fail_next_wait_idle(&self, result: vk::Result) {
        self.state.lock().failures.wait_idle = Some(result);
    }

    /// Finish the oldest pending submission. Returns false if none was
    /// pending.
    pub fn complete_next(&self) -> bool {
        let mut state = self.state.lock();
        let Some(submission) = state.pending.pop_front() else {
            return false;
        };
        state.signal(submission.fence);
        self.completed.notify_all();
        true
    }

    /// Finish every pending submission.
    pub fn complete_all(&self) {
        self.state.lock().complete_all();
        self.completed.notify_all();
    }

    /// Number of submissions the GPU has not finished.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Fence a [`GpuTiming::Manual`] wait is currently blocked on.
    pub fn blocked_on(&self) -> Option<vk::Fence> {
        self.state.lock().blocked_on
    }

    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().is_signaled(fence)
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Calls rendered with stable names (`fence0`, `sem1`, `cmd2`, ...).
    pub fn trace(&self) -> Vec<String> {
        let state = self.state.lock();
        state.calls.iter().map(|call| state.describe(call)).collect()
    }

    /// Forget recorded calls, keeping all objects and pending work.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Fences in creation order.
    pub fn fences(&self) -> Vec<vk::Fence> {
        self.state.lock().fence_order.clone()
    }

    /// Objects created and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        let fences = state.fences.values().filter(|f| !f.destroyed).count();
        let semaphores = state.semaphores.values().filter(|&&destroyed| !destroyed).count();
        fences + semaphores
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Fail if any misuse was recorded.
    pub fn check(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TestError::Violations(violations.join("; ")))
        }
    }

    fn violation(state: &mut State, message: String) {
        tracing::debug!("fake gpu violation: {message}");
        state.violations.push(message);
    }

    fn signal_semaphore(state: &mut State, semaphore: vk::Semaphore) {
        if !state.signaled_semaphores.insert(semaphore) {
            let name = state.semaphore_name(semaphore);
            Self::violation(state, format!("{name} signaled again before anything waited on it"));
        }
    }

    fn wait_semaphore(state: &mut State, semaphore: vk::Semaphore, waiter: &str) {
        if !state.signaled_semaphores.remove(&semaphore) {
            let name = state.semaphore_name(semaphore);
            Self::violation(state, format!("{waiter} waits on {name} but nothing signals it"));
        }
    }
}

impl FrameDevice for FakeGpu {
    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(state.handle());
        state.semaphores.insert(semaphore, false);
        state.semaphore_order.push(semaphore);
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.failures.fence_creation) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let fence = vk::Fence::from_raw(state.handle());
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                destroyed: false,
            },
        );
        state.fence_order.push(fence);
        state.calls.push(Call::CreateFence(fence));
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitFence(fence));

        if let Some(result) = state.failures.wait.take() {
            return Err(GpuError::Vulkan(result));
        }
        if state.fences.get(&fence).map_or(true, |f| f.destroyed) {
            let name = state.fence_name(fence);
            Self::violation(&mut state, format!("wait on unknown or destroyed {name}"));
            return Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN));
        }

        match self.timing {
            GpuTiming::Instant => {}
            GpuTiming::OnWait => state.complete_through(fence),
            GpuTiming::Manual => {
                while !state.is_signaled(fence) {
                    if !state.pending.iter().any(|s| s.fence == fence) {
                        // Nothing will ever signal it
                        let name = state.fence_name(fence);
                        Self::violation(&mut state, format!("wait on {name} would deadlock"));
                        return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
                    }
                    state.blocked_on = Some(fence);
                    self.completed.wait(&mut state);
                }
                state.blocked_on = None;
            }
        }

        if !state.is_signaled(fence) {
            let name = state.fence_name(fence);
            Self::violation(&mut state, format!("wait on {name} would deadlock"));
            return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetFence(fence));
        if state.pending.iter().any(|s| s.fence == fence) {
            let name = state.fence_name(fence);
            Self::violation(&mut state, format!("reset of {name} while its work is pending"));
        }
        if let Some(f) = state.fences.get_mut(&fence) {
            f.signaled = false;
        }
        Ok(())
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> GpuResult<(u32, bool)> {
        let mut state = self.state.lock();
        let outcome = state.acquires.pop_front().unwrap_or_else(|| {
            let image = state.next_image;
            state.next_image = (state.next_image + 1) % self.image_count.max(1);
            Acquire::Image(image)
        });

        match outcome {
            Acquire::Image(image) | Acquire::Suboptimal(image) => {
                state.calls.push(Call::Acquire {
                    signal,
                    image: Some(image),
                });
                Self::signal_semaphore(&mut state, signal);
                Ok((image, matches!(outcome, Acquire::Suboptimal(_))))
            }
            Acquire::Error(result) => {
                state.calls.push(Call::Acquire {
                    signal,
                    image: None,
                });
                if result == vk::Result::ERROR_OUT_OF_DATE_KHR {
                    Err(GpuError::SwapchainOutOfDate)
                } else {
                    Err(GpuError::Vulkan(result))
                }
            }
        }
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Submit {
            command_buffer,
            wait,
            wait_stage,
            signal,
            fence,
        });

        if let Some(result) = state.failures.submit.take() {
            return Err(GpuError::Vulkan(result));
        }
        Self::wait_semaphore(&mut state, wait, "submit");
        Self::signal_semaphore(&mut state, signal);
        if state.pending.iter().any(|s| s.command_buffer == command_buffer) {
            let name = state.command_buffer_name(command_buffer);
            Self::violation(&mut state, format!("{name} resubmitted while still pending"));
        }
        if state.is_signaled(fence) {
            let name = state.fence_name(fence);
            Self::violation(&mut state, format!("submit with {name} still signaled"));
        }

        match self.timing {
            GpuTiming::Instant => state.signal(fence),
            GpuTiming::OnWait | GpuTiming::Manual => state.pending.push_back(Submission {
                command_buffer,
                fence,
            }),
        }
        Ok(())
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> GpuResult<bool> {
        let mut state = self.state.lock();
        state.calls.push(Call::Present {
            image: image_index,
            wait,
        });
        // The wait is consumed even when presenting fails
        Self::wait_semaphore(&mut state, wait, "present");
        state.presents.pop_front().unwrap_or(Ok(false))
    }

    fn wait_idle(&self) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitIdle);
        if let Some(result) = state.failures.wait_idle.take() {
            return Err(GpuError::Vulkan(result));
        }
        state.complete_all();
        self.completed.notify_all();
        Ok(())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.calls.push(Call::DestroySemaphore(semaphore));
        if !state.pending.is_empty() {
            let name = state.semaphore_name(semaphore);
            Self::violation(&mut state, format!("{name} destroyed while work is pending"));
        }
        match state.semaphores.get_mut(&semaphore) {
            Some(destroyed) if !*destroyed => *destroyed = true,
            _ => {
                let name = state.semaphore_name(semaphore);
                Self::violation(&mut state, format!("double or unknown destroy of {name}"));
            }
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.calls.push(Call::DestroyFence(fence));
        if !state.pending.is_empty() {
            let name = state.fence_name(fence);
            Self::violation(&mut state, format!("{name} destroyed while work is pending"));
        }
        match state.fences.get_mut(&fence) {
            Some(f) if !f.destroyed => f.destroyed = true,
            _ => {
                let name = state.fence_name(fence);
                Self::violation(&mut state, format!("double or unknown destroy of {name}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_submission_signals_fence() {
        let gpu = FakeGpu::new(2, GpuTiming::Instant);
        let cmds = gpu.command_buffers();
        let acquired = gpu.create_semaphore().unwrap();
        let rendered = gpu.create_semaphore().unwrap();
        let fence = gpu.create_fence(false).unwrap();

        gpu.acquire_next_image(acquired).unwrap();
        gpu.submit(cmds[0], acquired, vk::PipelineStageFlags::empty(), rendered, fence)
            .unwrap();
        gpu.present(0, rendered).unwrap();
        assert!(gpu.is_signaled(fence));
        assert_eq!(gpu.pending(), 0);
        gpu.check().unwrap();
    }

    #[test]
    fn on_wait_completes_in_queue_order() {
        let gpu = FakeGpu::new(2, GpuTiming::OnWait);
        let cmds = gpu.command_buffers();
        let sem = gpu.create_semaphore().unwrap();
        let a = gpu.create_fence(false).unwrap();
        let b = gpu.create_fence(false).unwrap();
        let stage = vk::PipelineStageFlags::empty();

        gpu.submit(cmds[0], sem, stage, sem, a).unwrap();
        gpu.submit(cmds[1], sem, stage, sem, b).unwrap();
        assert_eq!(gpu.pending(), 2);

        gpu.wait_for_fence(b).unwrap();
        assert!(gpu.is_signaled(a));
        assert_eq!(gpu.pending(), 0);
    }

    #[test]
    fn resubmitting_pending_buffer_is_a_violation() {
        let gpu = FakeGpu::new(1, GpuTiming::Manual);
        let cmds = gpu.command_buffers();
        let sem = gpu.create_semaphore().unwrap();
        let a = gpu.create_fence(false).unwrap();
        let b = gpu.create_fence(false).unwrap();
        let stage = vk::PipelineStageFlags::empty();

        gpu.submit(cmds[0], sem, stage, sem, a).unwrap();
        gpu.submit(cmds[0], sem, stage, sem, b).unwrap();
        assert!(gpu.check().is_err());
    }

    #[test]
    fn manual_wait_without_pending_work_reports_deadlock() {
        let gpu = FakeGpu::new(1, GpuTiming::Manual);
        let fence = gpu.create_fence(false).unwrap();
        assert!(gpu.wait_for_fence(fence).is_err());
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn acquire_rotates_after_script() {
        let gpu = FakeGpu::new(3, GpuTiming::Instant);
        gpu.script_acquires([Acquire::Suboptimal(2)]);
        let sem = gpu.create_semaphore().unwrap();

        assert_eq!(gpu.acquire_next_image(sem).unwrap(), (2, true));
        assert_eq!(gpu.acquire_next_image(sem).unwrap(), (0, false));
        assert_eq!(gpu.acquire_next_image(sem).unwrap(), (1, false));
    }

    #[test]
    fn trace_uses_stable_names() {
        let gpu = FakeGpu::new(1, GpuTiming::Instant);
        let fence = gpu.create_fence(true).unwrap();
        gpu.wait_for_fence(fence).unwrap();
        gpu.destroy_fence(fence);
        assert_eq!(gpu.trace(), vec!["create fence0", "wait fence0", "destroy fence0"]);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn broken_semaphore_chain_is_a_violation() {
        let gpu = FakeGpu::new(2, GpuTiming::Instant);
        let cmds = gpu.command_buffers();
        let acquired = gpu.create_semaphore().unwrap();
        let rendered = gpu.create_semaphore().unwrap();
        let fence = gpu.create_fence(false).unwrap();

        gpu.acquire_next_image(acquired).unwrap();
        // Waits on the semaphore the acquire did not signal
        gpu.submit(cmds[0], rendered, vk::PipelineStageFlags::empty(), acquired, fence)
            .unwrap();
        assert_eq!(gpu.violations().len(), 2);
    }

    #[test]
    fn reacquire_with_pending_signal_is_a_violation() {
        let gpu = FakeGpu::new(2, GpuTiming::Instant);
        let acquired = gpu.create_semaphore().unwrap();

        gpu.acquire_next_image(acquired).unwrap();
        gpu.check().unwrap();
        gpu.acquire_next_image(acquired).unwrap();
        assert!(gpu.check().is_err());
    }

    #[test]
    fn failed_acquire_signals_nothing() {
        let gpu = FakeGpu::new(2, GpuTiming::Instant);
        gpu.script_acquires([Acquire::Error(vk::Result::ERROR_OUT_OF_DATE_KHR)]);
        let acquired = gpu.create_semaphore().unwrap();

        assert!(gpu.acquire_next_image(acquired).is_err());
        gpu.acquire_next_image(acquired).unwrap();
        gpu.check().unwrap();
    }
}

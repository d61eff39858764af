//! Frame scheduler behavior against the fake GPU.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use cryptic_gpu::{FrameScheduler, GpuError, PresentPolicy};
use cryptic_test::{Acquire, Call, FakeGpu, GpuTiming};

const TIMEOUT: Duration = Duration::from_secs(5);

fn scheduler<const N: usize>(gpu: &FakeGpu) -> FrameScheduler<N> {
    FrameScheduler::<N>::new(gpu, gpu.command_buffers()).unwrap()
}

fn wait_until_blocked(gpu: &FakeGpu, fence: vk::Fence) {
    let deadline = Instant::now() + TIMEOUT;
    while gpu.blocked_on() != Some(fence) {
        assert!(Instant::now() < deadline, "frame loop never blocked on {fence:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn slots_rotate_round_robin() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let mut scheduler = scheduler::<3>(&gpu);

    for i in 0..10u64 {
        let status = scheduler.run_frame(&gpu).unwrap();
        assert_eq!(status.slot, (i % 3) as usize);
        assert_eq!(status.frame_number, i);
        assert!(status.presented);
        assert!(!status.suboptimal);
    }
    assert_eq!(scheduler.frame_count(), 10);
    assert_eq!(scheduler.current_slot(), 1);

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn two_slots_over_three_images() {
    let gpu = FakeGpu::new(3, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.script_images([0, 1, 2, 0, 1]);
    gpu.clear_calls();

    let slots: Vec<_> = (0..5)
        .map(|_| scheduler.run_frame(&gpu).unwrap().slot)
        .collect();
    assert_eq!(slots, [0, 1, 0, 1, 0]);

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();

    // Frame 3 gets image 0 back while slot 0's work on it may still run,
    // so it waits on fence0 before reusing cmd0.
    insta::assert_snapshot!(gpu.trace().join("\n"), @r"
    wait fence0
    acquire image0 signal sem0
    reset fence0
    submit cmd0 wait sem0 signal sem1 fence0
    present image0 wait sem1
    wait fence1
    acquire image1 signal sem2
    reset fence1
    submit cmd1 wait sem2 signal sem3 fence1
    present image1 wait sem3
    wait fence0
    acquire image2 signal sem0
    reset fence0
    submit cmd2 wait sem0 signal sem1 fence0
    present image2 wait sem1
    wait fence1
    acquire image0 signal sem2
    wait fence0
    reset fence1
    submit cmd0 wait sem2 signal sem3 fence1
    present image0 wait sem3
    wait fence0
    acquire image1 signal sem0
    wait fence1
    reset fence0
    submit cmd1 wait sem0 signal sem1 fence0
    present image1 wait sem1
    wait idle
    destroy sem0
    destroy sem1
    destroy fence0
    destroy sem2
    destroy sem3
    destroy fence1
    ");
}

#[test]
fn image_collision_waits_on_previous_owner() {
    let gpu = FakeGpu::new(2, GpuTiming::OnWait);
    let mut scheduler = scheduler::<3>(&gpu);
    let fences = gpu.fences();
    gpu.script_images([0, 1, 0, 1]);

    scheduler.run_frame(&gpu).unwrap();
    scheduler.run_frame(&gpu).unwrap();
    assert_eq!(scheduler.image_fence(0), Some(fences[0]));

    gpu.clear_calls();
    let status = scheduler.run_frame(&gpu).unwrap();
    assert_eq!((status.slot, status.image_index), (2, 0));

    let calls = gpu.calls();
    let slot = *scheduler.slot(2).unwrap();
    assert_eq!(
        &calls[..3],
        &[
            Call::WaitFence(fences[2]),
            Call::Acquire {
                signal: slot.image_available,
                image: Some(0),
            },
            Call::WaitFence(fences[0]),
        ]
    );
    assert_eq!(scheduler.image_fence(0), Some(fences[2]));

    let status = scheduler.run_frame(&gpu).unwrap();
    assert_eq!((status.slot, status.image_index), (0, 1));
    assert_eq!(scheduler.image_fence(1), Some(fences[0]));

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn same_slot_reacquiring_its_image_does_not_wait_twice() {
    let gpu = FakeGpu::new(2, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    let fences = gpu.fences();

    scheduler.run_frame(&gpu).unwrap();
    scheduler.run_frame(&gpu).unwrap();
    gpu.clear_calls();
    scheduler.run_frame(&gpu).unwrap();

    let waits = gpu
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::WaitFence(_)))
        .count();
    assert_eq!(waits, 1);
    assert_eq!(gpu.calls()[0], Call::WaitFence(fences[0]));

    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn command_buffers_never_resubmitted_while_pending() {
    let images = [2, 0, 1, 1, 0, 2, 2, 1, 0, 0, 1, 2, 0, 2, 1];

    let gpu = FakeGpu::new(3, GpuTiming::OnWait);
    let mut two = scheduler::<2>(&gpu);
    gpu.script_images(images);
    for _ in 0..images.len() {
        two.run_frame(&gpu).unwrap();
    }
    two.destroy(&gpu).unwrap();
    gpu.check().unwrap();

    let gpu = FakeGpu::new(2, GpuTiming::OnWait);
    let mut three = scheduler::<3>(&gpu);
    gpu.script_images(images.iter().map(|i| i % 2));
    for _ in 0..images.len() {
        three.run_frame(&gpu).unwrap();
    }
    three.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn semaphores_chain_acquire_to_submit_to_present() {
    let gpu = FakeGpu::new(3, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.script_images([0, 1, 2, 0, 1, 1, 2]);
    gpu.clear_calls();

    let mut slots = Vec::new();
    for _ in 0..7 {
        slots.push(scheduler.run_frame(&gpu).unwrap().slot);
    }

    let calls = gpu.calls();
    let mut frames = 0;
    for (i, call) in calls.iter().enumerate() {
        let Call::Submit {
            wait,
            wait_stage,
            signal,
            ..
        } = *call
        else {
            continue;
        };
        let slot = *scheduler.slot(slots[frames]).unwrap();

        let acquired = calls[..i]
            .iter()
            .rev()
            .find_map(|c| match *c {
                Call::Acquire { signal, .. } => Some(signal),
                _ => None,
            })
            .unwrap();
        let presented = calls[i..]
            .iter()
            .find_map(|c| match *c {
                Call::Present { wait, .. } => Some(wait),
                _ => None,
            })
            .unwrap();

        assert_eq!(acquired, slot.image_available);
        assert_eq!(wait, acquired);
        assert_eq!(wait_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(signal, slot.render_finished);
        assert_eq!(presented, signal);
        frames += 1;
    }
    assert_eq!(frames, 7);

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn fence_is_waited_then_reset_right_before_submit() {
    let gpu = FakeGpu::new(3, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.clear_calls();

    for _ in 0..8 {
        scheduler.run_frame(&gpu).unwrap();
    }

    let calls = gpu.calls();
    let mut checked = 0;
    for (i, call) in calls.iter().enumerate() {
        let Call::Submit { fence, .. } = *call else {
            continue;
        };
        assert_eq!(calls[i - 1], Call::ResetFence(fence));

        let previous_submit = calls[..i - 1]
            .iter()
            .rposition(|c| matches!(c, Call::Submit { fence: f, .. } if *f == fence))
            .map_or(0, |p| p + 1);
        assert!(
            calls[previous_submit..i - 1].contains(&Call::WaitFence(fence)),
            "submit {i} reset a fence it never waited on"
        );
        checked += 1;
    }
    assert_eq!(checked, 8);

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn cpu_is_throttled_to_frames_in_flight() {
    let gpu = Arc::new(FakeGpu::new(2, GpuTiming::Manual));
    let mut scheduler = scheduler::<2>(&gpu);
    let fences = gpu.fences();

    let (tx, rx) = mpsc::channel();
    let worker = {
        let gpu = Arc::clone(&gpu);
        thread::spawn(move || {
            for _ in 0..4 {
                let status = scheduler.run_frame(&*gpu).unwrap();
                tx.send(status.frame_number).unwrap();
            }
            scheduler
        })
    };

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 0);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);

    // Both slots have work on the GPU, so the third frame has to wait.
    wait_until_blocked(&gpu, fences[0]);
    assert!(rx.try_recv().is_err());
    assert_eq!(gpu.pending(), 2);

    assert!(gpu.complete_next());
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);

    wait_until_blocked(&gpu, fences[1]);
    assert!(rx.try_recv().is_err());
    assert!(gpu.complete_next());
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 3);

    let scheduler = worker.join().unwrap();
    assert_eq!(gpu.pending(), 2);
    scheduler.destroy(&*gpu).unwrap();
    assert_eq!(gpu.pending(), 0);
    gpu.check().unwrap();
}

#[test]
fn destroy_drains_before_releasing() {
    let gpu = FakeGpu::new(3, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    for _ in 0..3 {
        scheduler.run_frame(&gpu).unwrap();
    }
    assert!(gpu.pending() > 0);

    gpu.clear_calls();
    scheduler.destroy(&gpu).unwrap();

    let calls = gpu.calls();
    assert_eq!(calls[0], Call::WaitIdle);
    assert_eq!(calls.len(), 7);
    assert!(calls[1..].iter().all(|call| matches!(
        call,
        Call::DestroySemaphore(_) | Call::DestroyFence(_)
    )));
    assert_eq!(gpu.live_objects(), 0);
    gpu.check().unwrap();
}

#[test]
fn destroy_leaks_slots_when_device_does_not_drain() {
    let gpu = FakeGpu::new(2, GpuTiming::OnWait);
    let mut scheduler = scheduler::<2>(&gpu);
    scheduler.run_frame(&gpu).unwrap();

    gpu.fail_next_wait_idle(vk::Result::ERROR_DEVICE_LOST);
    gpu.clear_calls();
    let err = scheduler.destroy(&gpu).unwrap_err();

    assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(gpu.calls(), [Call::WaitIdle]);
    assert_eq!(gpu.live_objects(), 6);
    gpu.check().unwrap();
}

#[test]
fn failed_acquire_leaves_fence_signaled() {
    let gpu = FakeGpu::new(2, GpuTiming::Manual);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.script_acquires([
        Acquire::Error(vk::Result::ERROR_OUT_OF_DATE_KHR),
        Acquire::Error(vk::Result::ERROR_SURFACE_LOST_KHR),
    ]);

    let err = scheduler.run_frame(&gpu).unwrap_err();
    assert!(err.is_out_of_date());
    let err = scheduler.run_frame(&gpu).unwrap_err();
    assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR)));

    assert_eq!(scheduler.current_slot(), 0);
    assert_eq!(scheduler.frame_count(), 0);
    assert!(!gpu
        .calls()
        .iter()
        .any(|call| matches!(call, Call::ResetFence(_) | Call::Submit { .. })));

    // A reset fence with nothing pending would make this wait forever.
    let status = scheduler.run_frame(&gpu).unwrap();
    assert_eq!((status.slot, status.frame_number), (0, 0));

    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn out_of_range_image_is_rejected_before_submit() {
    let gpu = FakeGpu::new(3, GpuTiming::Manual);
    let mut scheduler = scheduler::<2>(&gpu);
    let fences = gpu.fences();
    gpu.script_images([5]);

    let err = scheduler.run_frame(&gpu).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)));
    assert_eq!(scheduler.frame_count(), 0);
    assert!(gpu.is_signaled(fences[0]));
    assert!(!gpu
        .calls()
        .iter()
        .any(|call| matches!(call, Call::ResetFence(_) | Call::Submit { .. })));

    // The acquire already signaled, so only teardown may follow.
    scheduler.destroy(&gpu).unwrap();
    gpu.check().unwrap();
}

#[test]
fn errors_after_acquire_end_the_frame_loop() {
    let gpu = FakeGpu::new(3, GpuTiming::Instant);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.script_images([5]);

    assert!(scheduler.run_frame(&gpu).is_err());
    gpu.check().unwrap();

    // Same slot, same image-available semaphore with its signal unconsumed
    let _ = scheduler.run_frame(&gpu);
    assert!(gpu.check().is_err());
    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn suboptimal_is_reported_and_frame_proceeds() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.script_acquires([Acquire::Suboptimal(0)]);
    gpu.script_presents([Ok(false), Ok(true)]);

    let first = scheduler.run_frame(&gpu).unwrap();
    assert!(first.suboptimal);
    assert!(first.presented);

    let second = scheduler.run_frame(&gpu).unwrap();
    assert!(second.suboptimal);

    let third = scheduler.run_frame(&gpu).unwrap();
    assert!(!third.suboptimal);

    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn present_failure_is_skipped_by_default() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let mut scheduler = scheduler::<2>(&gpu);
    assert_eq!(scheduler.present_policy(), PresentPolicy::Skip);
    gpu.script_presents([Err(GpuError::Present(vk::Result::ERROR_SURFACE_LOST_KHR))]);

    let status = scheduler.run_frame(&gpu).unwrap();
    assert!(!status.presented);
    assert_eq!(scheduler.current_slot(), 1);

    let status = scheduler.run_frame(&gpu).unwrap();
    assert!(status.presented);

    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn present_failure_propagates_after_advancing() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let mut scheduler = scheduler::<2>(&gpu).with_present_policy(PresentPolicy::Propagate);
    gpu.script_presents([Err(GpuError::Present(vk::Result::ERROR_SURFACE_LOST_KHR))]);

    let err = scheduler.run_frame(&gpu).unwrap_err();
    assert!(matches!(err, GpuError::Present(_)));
    assert_eq!(scheduler.current_slot(), 1);
    assert_eq!(scheduler.frame_count(), 1);

    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn out_of_date_present_is_returned_under_either_policy() {
    for policy in [PresentPolicy::Skip, PresentPolicy::Propagate] {
        let gpu = FakeGpu::new(2, GpuTiming::Instant);
        let mut scheduler = scheduler::<2>(&gpu).with_present_policy(policy);
        gpu.script_presents([Err(GpuError::SwapchainOutOfDate)]);

        let err = scheduler.run_frame(&gpu).unwrap_err();
        assert!(err.is_out_of_date());
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frame_count(), 1);

        scheduler.destroy(&gpu).unwrap();
    }
}

#[test]
fn failed_submit_is_returned() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let mut scheduler = scheduler::<2>(&gpu);
    gpu.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

    let err = scheduler.run_frame(&gpu).unwrap_err();
    assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(scheduler.frame_count(), 0);

    scheduler.destroy(&gpu).unwrap();
}

#[test]
fn zero_frames_in_flight_is_rejected() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    let err = FrameScheduler::<0>::new(&gpu, gpu.command_buffers()).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)));

    let err = FrameScheduler::<2>::new(&gpu, Vec::new()).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)));
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn partial_slot_creation_is_cleaned_up() {
    let gpu = FakeGpu::new(2, GpuTiming::Instant);
    gpu.fail_next_fence_creation();

    let result = FrameScheduler::<2>::new(&gpu, gpu.command_buffers());
    assert!(result.is_err());
    assert_eq!(gpu.live_objects(), 0);
    gpu.check().unwrap();
}

#[test]
fn accessors_describe_the_schedule() {
    let gpu = FakeGpu::new(3, GpuTiming::Instant);
    let scheduler = scheduler::<2>(&gpu);

    assert_eq!(scheduler.frames_in_flight(), 2);
    assert_eq!(scheduler.image_count(), 3);
    assert!(scheduler.slot(1).is_some());
    assert!(scheduler.slot(2).is_none());
    assert_eq!(scheduler.image_fence(0), None);

    let slot = *scheduler.slot(0).unwrap();
    assert_eq!(slot.in_flight, gpu.fences()[0]);
    assert!(gpu.is_signaled(slot.in_flight));

    scheduler.destroy(&gpu).unwrap();
}

mod common;

use common::{device, device_with, render_frame, swapchain_creations, HEIGHT, WIDTH};
use gfx_device::ash::vk;
use gfx_device::backend::dummy::DriverCall;
use gfx_device::backend::DummyConfig;
use gfx_device::config::GraphicsConfig;
use gfx_device::{ErrorKind, FrameStatus, GfxError, PresentStatus};
use rstest::rstest;

#[test]
fn frames_cycle_through_the_ring() {
    let (mut device, driver) = device();

    let indices: Vec<u32> = (0..5)
        .map(|_| {
            let (frame, status) = render_frame(&mut device);
            assert_eq!(status, PresentStatus::Presented);
            frame.frame_index
        })
        .collect();

    assert_eq!(indices, vec![0, 1, 0, 1, 0]);
    assert_eq!(driver.present_count(), 5);
    assert_eq!(driver.submit_count(), 5);
    assert!(driver.fence_wait_count() >= driver.submit_count());
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());

    device.shutdown();
    assert_eq!(driver.live_object_count(), 0);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn slot_fence_is_waited_before_its_command_buffer_is_reset() {
    let (mut device, driver) = device();
    render_frame(&mut device);
    render_frame(&mut device);
    driver.clear_calls();

    // Third frame reuses slot 0, which still has a submission in flight.
    render_frame(&mut device);
    let calls = driver.calls();
    let wait = common::position(&calls, |c| matches!(c, DriverCall::WaitFence(_)));
    let reset_fence = common::position(&calls, |c| matches!(c, DriverCall::ResetFence(_)));
    let reset_cmd = common::position(&calls, |c| matches!(c, DriverCall::ResetCommandBuffer(_)));
    let submit = common::position(&calls, |c| matches!(c, DriverCall::Submit { .. }));
    let present = common::position(&calls, |c| matches!(c, DriverCall::Present { .. }));

    assert!(wait < reset_fence);
    assert!(reset_fence < reset_cmd);
    assert!(reset_cmd < submit);
    assert!(submit < present);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn swapchain_layout_matches_last_transition() {
    let (mut device, driver) = device();
    driver.clear_calls();

    let (frame, _) = render_frame(&mut device);
    let image = device.swapchain().image(frame.image_index).unwrap();
    let state = device.swapchain().image_state(frame.image_index).unwrap();

    assert_eq!(state.layout(), vk::ImageLayout::PRESENT_SRC_KHR);
    assert_eq!(driver.image_layout(image), Some(vk::ImageLayout::PRESENT_SRC_KHR));

    let barriers: Vec<_> = driver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::Barrier(barrier) => Some(barrier),
            _ => None,
        })
        .collect();
    assert_eq!(barriers.len(), 2);
    assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
    assert_eq!(barriers[1].old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    for barrier in &barriers {
        assert!(barrier
            .src_stage
            .contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
        assert!(barrier
            .dst_stage
            .contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
    }

    // Same image again: the barrier starts from where the last frame left it.
    render_frame(&mut device);
    render_frame(&mut device);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn submit_without_a_frame_is_a_usage_error() {
    let (mut device, driver) = device();

    let err = device.submit().unwrap_err();
    assert!(matches!(err, GfxError::NoFrameInProgress));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(driver.submit_count(), 0);
}

#[test]
fn new_frame_twice_without_submit_is_rejected() {
    let (mut device, _driver) = device();

    assert!(matches!(device.new_frame(), Ok(FrameStatus::Ready(_))));
    let err = device.new_frame().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);

    assert!(device.current_frame().is_some());
    device.submit().unwrap();
    assert!(device.current_frame().is_none());
}

#[test]
fn swapchain_cannot_be_rebuilt_while_recording() {
    let (mut device, driver) = device();
    render_frame(&mut device);

    let frame = match device.new_frame().unwrap() {
        FrameStatus::Ready(frame) => frame,
        FrameStatus::Skipped => panic!("frame was skipped"),
    };
    let chain = device.swapchain().handle();

    let err = device.recreate_swapchain(1920, 1080).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = device.handle_surface_resize(1920, 1080).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(device.swapchain().handle(), chain);
    assert_eq!(device.current_swapchain_index(), frame.image_index);

    device
        .transition_swapchain_image(
            frame.command_buffer,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags2::NONE,
        )
        .unwrap();
    assert_eq!(device.submit().unwrap(), PresentStatus::Presented);
    let state = device.swapchain().image_state(frame.image_index).unwrap();
    assert_eq!(state.layout(), vk::ImageLayout::PRESENT_SRC_KHR);

    // Between frames the same request goes through.
    assert!(device.handle_surface_resize(1920, 1080).unwrap());
    render_frame(&mut device);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn failed_submit_marks_the_ring_lost() {
    let (mut device, driver) = device();
    render_frame(&mut device);

    let frame = match device.new_frame().unwrap() {
        FrameStatus::Ready(frame) => frame,
        FrameStatus::Skipped => panic!("frame was skipped"),
    };
    driver.fail_next_submits(1);
    let err = device.submit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(device.frames().is_lost());
    assert_eq!(device.frame_index(), frame.frame_index);

    // The slot's fence was reset and will never signal; waiting on it would hang.
    let waits = driver.fence_wait_count();
    assert!(matches!(device.new_frame(), Err(GfxError::FrameRingLost)));
    assert_eq!(driver.fence_wait_count(), waits);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn skipped_frame_does_not_advance() {
    let graphics = GraphicsConfig {
        recreate_after_out_of_date: 0,
        ..GraphicsConfig::default()
    };
    let (mut device, driver) = device_with(DummyConfig::default(), &graphics);
    driver.fail_next_acquires(1);

    assert_eq!(device.new_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(device.frame_index(), 0);
    assert_eq!(device.frames().out_of_date_streak(), 1);
    assert!(matches!(device.submit(), Err(GfxError::NoFrameInProgress)));
    assert_eq!(driver.submit_count(), 0);
    assert_eq!(driver.present_count(), 0);

    let (frame, _) = render_frame(&mut device);
    assert_eq!(frame.frame_index, 0);
    assert_eq!(device.frames().out_of_date_streak(), 0);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[rstest]
#[case::recreates_at_threshold(2, 2, 1)]
#[case::disabled(0, 2, 0)]
#[case::below_threshold(3, 2, 0)]
#[case::single_threshold(1, 1, 1)]
fn repeated_out_of_date_recreates_at_current_size(
    #[case] threshold: u32,
    #[case] failures: u32,
    #[case] expected_recreations: usize,
) {
    let graphics = GraphicsConfig {
        recreate_after_out_of_date: threshold,
        ..GraphicsConfig::default()
    };
    let (mut device, driver) = device_with(DummyConfig::default(), &graphics);
    driver.clear_calls();
    driver.fail_next_acquires(failures);

    for _ in 0..failures {
        assert_eq!(device.new_frame().unwrap(), FrameStatus::Skipped);
    }

    let calls = driver.calls();
    let creations = swapchain_creations(&calls);
    assert_eq!(creations.len(), expected_recreations);
    for creation in creations {
        match creation {
            DriverCall::CreateSwapchain { width, height, .. } => {
                assert_eq!((*width, *height), (WIDTH, HEIGHT));
            }
            _ => unreachable!(),
        }
    }

    // The next acquire succeeds either way.
    let (_, status) = render_frame(&mut device);
    assert_eq!(status, PresentStatus::Presented);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

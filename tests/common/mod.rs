#![allow(dead_code)]

use gfx_device::ash::vk;
use gfx_device::backend::dummy::DriverCall;
use gfx_device::backend::{DummyConfig, DummyDriver, GfxDevice};
use gfx_device::config::GraphicsConfig;
use gfx_device::{FrameInfo, FrameStatus, PresentStatus};

pub const WIDTH: u32 = 1280;
pub const HEIGHT: u32 = 720;

/// A device on a fresh dummy driver, plus a handle to inspect the driver.
pub fn device_with(config: DummyConfig, graphics: &GraphicsConfig) -> (GfxDevice<DummyDriver>, DummyDriver) {
    let driver = DummyDriver::new(config);
    let probe = driver.clone();
    let device = GfxDevice::initialize(driver, graphics, WIDTH, HEIGHT).expect("device initializes");
    (device, probe)
}

pub fn device() -> (GfxDevice<DummyDriver>, DummyDriver) {
    device_with(DummyConfig::default(), &GraphicsConfig::default())
}

/// Acquire, transition to colour attachment and back to present, submit.
pub fn render_frame(device: &mut GfxDevice<DummyDriver>) -> (FrameInfo, PresentStatus) {
    let frame = match device.new_frame().expect("new_frame") {
        FrameStatus::Ready(frame) => frame,
        FrameStatus::Skipped => panic!("frame was skipped"),
    };
    device
        .transition_swapchain_image(
            frame.command_buffer,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        )
        .expect("transition to attachment");
    device
        .transition_swapchain_image(
            frame.command_buffer,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags2::NONE,
        )
        .expect("transition to present");
    let status = device.submit().expect("submit");
    (frame, status)
}

pub fn position(calls: &[DriverCall], matches: impl Fn(&DriverCall) -> bool) -> usize {
    calls
        .iter()
        .position(matches)
        .unwrap_or_else(|| panic!("call not found in {:#?}", calls))
}

pub fn last_position(calls: &[DriverCall], matches: impl Fn(&DriverCall) -> bool) -> usize {
    calls
        .iter()
        .rposition(matches)
        .unwrap_or_else(|| panic!("call not found in {:#?}", calls))
}

pub fn swapchain_creations(calls: &[DriverCall]) -> Vec<&DriverCall> {
    calls
        .iter()
        .filter(|call| matches!(call, DriverCall::CreateSwapchain { .. }))
        .collect()
}

/// Minimal valid SPIR-V header.
pub fn spirv_bytes() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0300, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

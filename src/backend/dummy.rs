//! GPU-less driver for tests.
//!
//! `DummyDriver` hands out fake handles and simulates just enough of Vulkan
//! to check the device core: fence and semaphore states, command buffer
//! lifetimes, swapchain retirement, image layouts and host-visible memory.
//! Copies recorded into a command buffer execute when it is submitted, so
//! uploads can be read back byte for byte.
//!
//! Misuse that a validation layer would flag is recorded in `violations()`
//! and, for fallible calls, returned as `ERROR_VALIDATION_FAILED_EXT`.
//!
//! The driver is a cheap handle over shared state: keep a clone to inspect
//! it after the owning device is gone.

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use super::driver::{GpuDriver, ImageBarrier, ImageDesc, ImageViewDesc, SubmitDesc, SwapchainDesc};
use super::image::texel_size;
use super::surface::PlatformKind;
use crate::error::{GfxError, GfxResult};

/// What the simulated physical device and surface report.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub api_version: u32,
    pub platform: PlatformKind,
    /// Property flags per memory type, in index order.
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    pub buffer_memory_type_bits: u32,
    pub image_memory_type_bits: u32,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub min_image_count: u32,
    /// 0 means no limit.
    pub max_image_count: u32,
    /// `None` lets the swapchain pick the extent (reported as 0xFFFFFFFF).
    pub surface_extent: Option<vk::Extent2D>,
    pub supports_present: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            api_version: vk::API_VERSION_1_3,
            platform: PlatformKind::Desktop,
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            buffer_memory_type_bits: u32::MAX,
            image_memory_type_bits: u32::MAX,
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            min_image_count: 2,
            max_image_count: 8,
            surface_extent: None,
            supports_present: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    ImageView,
    Image,
    Buffer,
    Memory,
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    DescriptorPool,
    ShaderModule,
}

/// One entry in the driver's call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Create { kind: ObjectKind, handle: u64 },
    Destroy { kind: ObjectKind, handle: u64 },
    CreateSwapchain {
        handle: u64,
        width: u32,
        height: u32,
        min_image_count: u32,
        old_swapchain: u64,
    },
    WaitIdle,
    WaitFence(u64),
    ResetFence(u64),
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    /// `image_index` is `None` when the acquire reported out-of-date.
    Acquire { image_index: Option<u32> },
    Submit { command_buffer: u64, fence: u64 },
    Present { image_index: u32 },
    Barrier(ImageBarrier),
    CopyBuffer { src: u64, dst: u64 },
    CopyBufferToImage { src: u64, dst: u64 },
    SetObjectName(String),
    DestroyDriver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    /// Submitted; completes on the next wait.
    Pending,
    Signaled,
}

#[derive(Debug, Clone)]
enum Command {
    CopyBuffer {
        src: u64,
        dst: u64,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: u64,
        dst: u64,
        regions: Vec<vk::BufferImageCopy>,
    },
}

#[derive(Debug, Default)]
struct CommandBufferState {
    pool: u64,
    recording: bool,
    executable: bool,
    in_flight: Option<u64>,
    commands: Vec<Command>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<u64>,
    next_image: usize,
    // Acquired and not yet presented
    acquired: Vec<u32>,
    retired: bool,
}

#[derive(Debug)]
struct BufferState {
    size: u64,
    memory: Option<u64>,
}

#[derive(Debug)]
struct ImageRecord {
    desc: ImageDesc,
    memory: Option<u64>,
    layout: vk::ImageLayout,
}

#[derive(Debug)]
struct MemoryState {
    type_index: u32,
    bytes: Box<[u8]>,
    mapped: bool,
}

#[derive(Debug)]
struct DummyState {
    config: DummyConfig,
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    calls: Vec<DriverCall>,
    violations: Vec<String>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    command_buffers: HashMap<u64, CommandBufferState>,
    swapchains: HashMap<u64, SwapchainState>,
    buffers: HashMap<u64, BufferState>,
    images: HashMap<u64, ImageRecord>,
    memory: HashMap<u64, MemoryState>,
    fail_acquires: u32,
    fail_submits: u32,
    presents: usize,
    fence_waits: usize,
    submits: usize,
    destroyed: bool,
}

fn validation_failed(call: &'static str) -> GfxError {
    GfxError::Vulkan {
        call,
        result: vk::Result::ERROR_VALIDATION_FAILED_EXT,
    }
}

fn mip_extent(desc: &ImageDesc, level: u32) -> (u64, u64) {
    (
        (desc.extent.width >> level).max(1) as u64,
        (desc.extent.height >> level).max(1) as u64,
    )
}

/// Byte offset of `level` when every level is packed one after another.
fn mip_offset(desc: &ImageDesc, level: u32, texel: u64) -> u64 {
    (0..level)
        .map(|l| {
            let (w, h) = mip_extent(desc, l);
            w * h * texel
        })
        .sum()
}

impl DummyState {
    fn new(config: DummyConfig) -> Self {
        Self {
            config,
            next_handle: 0x1000,
            live: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffers: HashMap::new(),
            swapchains: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            memory: HashMap::new(),
            fail_acquires: 0,
            fail_submits: 0,
            presents: 0,
            fence_waits: 0,
            submits: 0,
            destroyed: false,
        }
    }

    fn violation(&mut self, call: &'static str, message: String) -> GfxError {
        log::error!("[dummy] {}: {}", call, message);
        self.violations.push(format!("{}: {}", call, message));
        validation_failed(call)
    }

    fn alloc(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.live.insert(handle, kind);
        self.calls.push(DriverCall::Create { kind, handle });
        handle
    }

    /// Remove a live handle. Null handles are ignored like in Vulkan.
    fn release(&mut self, call: &'static str, kind: ObjectKind, handle: u64) -> bool {
        if handle == 0 {
            return false;
        }
        self.calls.push(DriverCall::Destroy { kind, handle });
        match self.live.remove(&handle) {
            Some(found) if found == kind => true,
            Some(found) => {
                self.live.insert(handle, found);
                self.violation(call, format!("{:#x} is a {:?}, not a {:?}", handle, found, kind));
                false
            }
            None => {
                self.violation(call, format!("{:?} {:#x} is not alive", kind, handle));
                false
            }
        }
    }

    fn expect_live(&mut self, call: &'static str, kind: ObjectKind, handle: u64) -> GfxResult<()> {
        if self.live.get(&handle) == Some(&kind) {
            Ok(())
        } else {
            Err(self.violation(call, format!("{:?} {:#x} is not alive", kind, handle)))
        }
    }

    fn command_buffer_in_flight(&self, cmd: u64) -> bool {
        self.command_buffers
            .get(&cmd)
            .and_then(|state| state.in_flight)
            .map_or(false, |fence| self.fences.get(&fence) == Some(&FenceState::Pending))
    }

    fn record(&mut self, call: &'static str, cmd: u64, command: Option<Command>) {
        let recording = self.command_buffers.get(&cmd).map_or(false, |c| c.recording);
        if !recording {
            self.violation(call, format!("command buffer {:#x} is not recording", cmd));
            return;
        }
        if let (Some(command), Some(state)) = (command, self.command_buffers.get_mut(&cmd)) {
            state.commands.push(command);
        }
    }

    fn read_bytes(&mut self, call: &'static str, memory: Option<u64>, offset: u64, len: u64) -> GfxResult<Vec<u8>> {
        let range = self
            .memory
            .get(&memory.unwrap_or(0))
            .and_then(|m| m.bytes.get(offset as usize..(offset + len) as usize))
            .map(|bytes| bytes.to_vec());
        range.ok_or_else(|| {
            self.violation(call, format!("read of {} bytes at {} is out of bounds", len, offset))
        })
    }

    fn write_bytes(&mut self, call: &'static str, memory: Option<u64>, offset: u64, data: &[u8]) -> GfxResult<()> {
        let written = self
            .memory
            .get_mut(&memory.unwrap_or(0))
            .and_then(|m| m.bytes.get_mut(offset as usize..offset as usize + data.len()))
            .map(|dst| dst.copy_from_slice(data))
            .is_some();
        if written {
            Ok(())
        } else {
            Err(self.violation(
                call,
                format!("write of {} bytes at {} is out of bounds", data.len(), offset),
            ))
        }
    }

    fn execute(&mut self, commands: Vec<Command>) -> GfxResult<()> {
        const CALL: &str = "vkQueueSubmit";
        for command in commands {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    let src_mem = self.buffers.get(&src).and_then(|b| b.memory);
                    let dst_mem = self.buffers.get(&dst).and_then(|b| b.memory);
                    for region in regions {
                        let bytes = self.read_bytes(CALL, src_mem, region.src_offset, region.size)?;
                        self.write_bytes(CALL, dst_mem, region.dst_offset, &bytes)?;
                    }
                }
                Command::CopyBufferToImage { src, dst, regions } => {
                    let src_mem = self.buffers.get(&src).and_then(|b| b.memory);
                    let found = self.images.get(&dst).map(|image| (image.desc, image.memory));
                    let (desc, dst_mem) = match found {
                        Some(found) => found,
                        None => {
                            return Err(self.violation(CALL, format!("image {:#x} is gone", dst)))
                        }
                    };
                    let texel = texel_size(desc.format).unwrap_or(4);
                    for region in regions {
                        let level = region.image_subresource.mip_level;
                        let len = region.image_extent.width as u64
                            * region.image_extent.height as u64
                            * texel;
                        let bytes = self.read_bytes(CALL, src_mem, region.buffer_offset, len)?;
                        let offset = mip_offset(&desc, level, texel);
                        self.write_bytes(CALL, dst_mem, offset, &bytes)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Simulated device. Clones share state.
#[derive(Debug, Clone)]
pub struct DummyDriver {
    state: Arc<Mutex<DummyState>>,
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl DummyDriver {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DummyState::new(config))),
        }
    }

    /// Make the next `count` acquires report an out-of-date swapchain.
    pub fn fail_next_acquires(&self, count: u32) {
        self.state.lock().fail_acquires = count;
    }

    /// Make the next `count` queue submissions fail with out-of-device-memory.
    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().fail_submits = count;
    }

    /// Change the extent the surface reports, as a window resize would.
    pub fn set_surface_extent(&self, extent: Option<vk::Extent2D>) {
        self.state.lock().config.surface_extent = extent;
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().presents
    }

    pub fn fence_wait_count(&self) -> usize {
        self.state.lock().fence_waits
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().submits
    }

    pub fn is_alive(&self, handle: u64) -> bool {
        self.state.lock().live.contains_key(&handle)
    }

    pub fn live_object_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.values().filter(|&&k| k == kind).count()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Current contents of a memory allocation.
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state
            .lock()
            .memory
            .get(&memory.as_raw())
            .map(|m| m.bytes.to_vec())
    }

    /// Layout the image is in after every barrier recorded so far.
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state.lock().images.get(&image.as_raw()).map(|i| i.layout)
    }
}

impl GpuDriver for DummyDriver {
    fn api_version(&self) -> u32 {
        self.state.lock().config.api_version
    }

    fn platform(&self) -> PlatformKind {
        self.state.lock().config.platform
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state.lock();
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        for (i, &flags) in state
            .config
            .memory_types
            .iter()
            .take(vk::MAX_MEMORY_TYPES)
            .enumerate()
        {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
            props.memory_type_count = i as u32 + 1;
        }
        props.memory_heap_count = 1;
        props.memory_heaps[0].size = 1 << 30;
        props
    }

    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::WaitIdle);
        for fence in state.fences.values_mut() {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn set_object_name(&self, _handle: u64, _object_type: vk::ObjectType, name: &str) {
        self.state
            .lock()
            .calls
            .push(DriverCall::SetObjectName(name.to_string()));
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::DestroyDriver);
        if !state.live.is_empty() {
            let leaked = state.live.len();
            state.violation(
                "vkDestroyDevice",
                format!("{} objects still alive", leaked),
            );
        }
        state.destroyed = true;
    }

    fn surface_supports_present(&self) -> GfxResult<bool> {
        Ok(self.state.lock().config.supports_present)
    }

    fn surface_capabilities(&self) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.lock();
        let config = &state.config;
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: config.min_image_count,
            max_image_count: config.max_image_count,
            current_extent: config.surface_extent.unwrap_or(vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }),
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 16384,
                height: 16384,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE
                | vk::CompositeAlphaFlagsKHR::INHERIT,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        })
    }

    fn surface_formats(&self) -> GfxResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.lock().config.surface_formats.clone())
    }

    fn surface_present_modes(&self) -> GfxResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.lock().config.present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<vk::SwapchainKHR> {
        const CALL: &str = "vkCreateSwapchainKHR";
        let mut state = self.state.lock();
        let config = state.config.clone();

        if desc.min_image_count < config.min_image_count
            || (config.max_image_count > 0 && desc.min_image_count > config.max_image_count)
        {
            return Err(state.violation(
                CALL,
                format!("min_image_count {} outside device limits", desc.min_image_count),
            ));
        }
        if !config.present_modes.contains(&desc.present_mode) {
            return Err(state.violation(CALL, format!("{:?} not supported", desc.present_mode)));
        }
        if !config
            .surface_formats
            .iter()
            .any(|f| f.format == desc.format.format && f.color_space == desc.format.color_space)
        {
            return Err(state.violation(CALL, format!("{:?} not supported", desc.format.format)));
        }

        let old = desc.old_swapchain.as_raw();
        if old != 0 {
            let current = state.swapchains.get(&old).map_or(false, |s| !s.retired);
            if !current {
                return Err(state.violation(
                    CALL,
                    format!("old swapchain {:#x} is not a current swapchain", old),
                ));
            }
            if let Some(swapchain) = state.swapchains.get_mut(&old) {
                swapchain.retired = true;
            }
        }

        let handle = state.alloc(ObjectKind::Swapchain);
        let mut images = Vec::with_capacity(desc.min_image_count as usize);
        for _ in 0..desc.min_image_count {
            // Swapchain images are owned by the swapchain, not tracked as live.
            state.next_handle += 1;
            let image = state.next_handle;
            state.images.insert(
                image,
                ImageRecord {
                    desc: ImageDesc {
                        extent: desc.extent,
                        format: desc.format.format,
                        usage: desc.usage,
                        mip_levels: 1,
                    },
                    memory: None,
                    layout: vk::ImageLayout::UNDEFINED,
                },
            );
            images.push(image);
        }
        state.swapchains.insert(
            handle,
            SwapchainState {
                images,
                next_image: 0,
                acquired: Vec::new(),
                retired: false,
            },
        );
        state.calls.push(DriverCall::CreateSwapchain {
            handle,
            width: desc.extent.width,
            height: desc.extent.height,
            min_image_count: desc.min_image_count,
            old_swapchain: old,
        });
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GfxResult<Vec<vk::Image>> {
        let mut state = self.state.lock();
        let images: Option<Vec<vk::Image>> = state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.images.iter().map(|&i| vk::Image::from_raw(i)).collect());
        images.ok_or_else(|| {
            state.violation(
                "vkGetSwapchainImagesKHR",
                format!("unknown swapchain {:#x}", swapchain.as_raw()),
            )
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let handle = swapchain.as_raw();
        if state.release("vkDestroySwapchainKHR", ObjectKind::Swapchain, handle) {
            if let Some(removed) = state.swapchains.remove(&handle) {
                for image in removed.images {
                    state.images.remove(&image);
                }
            }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> GfxResult<(u32, bool)> {
        const CALL: &str = "vkAcquireNextImageKHR";
        let mut state = self.state.lock();
        state.expect_live(CALL, ObjectKind::Semaphore, signal.as_raw())?;

        let retired = state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.retired);
        let out_of_date = match retired {
            None => {
                return Err(state.violation(
                    CALL,
                    format!("unknown swapchain {:#x}", swapchain.as_raw()),
                ))
            }
            Some(retired) => retired || state.fail_acquires > 0,
        };
        if out_of_date {
            state.fail_acquires = state.fail_acquires.saturating_sub(1);
            state.calls.push(DriverCall::Acquire { image_index: None });
            return Err(GfxError::SwapchainOutOfDate);
        }

        if state.semaphores.get(&signal.as_raw()) == Some(&true) {
            return Err(state.violation(CALL, "acquire semaphore is already signaled".into()));
        }
        state.semaphores.insert(signal.as_raw(), true);

        let index = match state.swapchains.get_mut(&swapchain.as_raw()) {
            Some(s) => {
                let index = s.next_image as u32;
                s.next_image = (s.next_image + 1) % s.images.len().max(1);
                s.acquired.push(index);
                index
            }
            None => 0,
        };
        state.calls.push(DriverCall::Acquire {
            image_index: Some(index),
        });
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GfxResult<bool> {
        const CALL: &str = "vkQueuePresentKHR";
        let mut state = self.state.lock();
        let image_count = state.swapchains.get(&swapchain.as_raw()).map(|s| s.images.len());
        match image_count {
            Some(count) if (image_index as usize) < count => {}
            _ => {
                return Err(state.violation(
                    CALL,
                    format!("image {} of swapchain {:#x}", image_index, swapchain.as_raw()),
                ))
            }
        }
        let acquired = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .and_then(|s| {
                let slot = s.acquired.iter().position(|&i| i == image_index)?;
                Some(s.acquired.remove(slot))
            })
            .is_some();
        if !acquired {
            return Err(state.violation(
                CALL,
                format!(
                    "image {} of swapchain {:#x} was never acquired",
                    image_index,
                    swapchain.as_raw()
                ),
            ));
        }
        if state.semaphores.get(&wait.as_raw()) != Some(&true) {
            return Err(state.violation(CALL, "wait semaphore was never signaled".into()));
        }
        state.semaphores.insert(wait.as_raw(), false);
        state.presents += 1;
        state.calls.push(DriverCall::Present { image_index });
        Ok(false)
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence> {
        let mut state = self.state.lock();
        let handle = state.alloc(ObjectKind::Fence);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(handle, initial);
        Ok(vk::Fence::from_raw(handle))
    }

    fn wait_fence(&self, fence: vk::Fence) -> GfxResult<()> {
        const CALL: &str = "vkWaitForFences";
        let mut state = self.state.lock();
        let handle = fence.as_raw();
        state.calls.push(DriverCall::WaitFence(handle));
        state.fence_waits += 1;
        match state.fences.get(&handle).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                state.fences.insert(handle, FenceState::Signaled);
                Ok(())
            }
            Some(FenceState::Unsignaled) => Err(state.violation(
                CALL,
                format!("fence {:#x} was never submitted, wait would hang", handle),
            )),
            None => Err(state.violation(CALL, format!("unknown fence {:#x}", handle))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> GfxResult<()> {
        const CALL: &str = "vkResetFences";
        let mut state = self.state.lock();
        let handle = fence.as_raw();
        state.calls.push(DriverCall::ResetFence(handle));
        match state.fences.get(&handle).copied() {
            Some(FenceState::Pending) => Err(state.violation(
                CALL,
                format!("fence {:#x} is still in use by the queue", handle),
            )),
            Some(_) => {
                state.fences.insert(handle, FenceState::Unsignaled);
                Ok(())
            }
            None => Err(state.violation(CALL, format!("unknown fence {:#x}", handle))),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        let handle = fence.as_raw();
        if state.fences.get(&handle) == Some(&FenceState::Pending) {
            state.violation("vkDestroyFence", format!("fence {:#x} is still in use", handle));
        }
        if state.release("vkDestroyFence", ObjectKind::Fence, handle) {
            state.fences.remove(&handle);
        }
    }

    fn create_semaphore(&self) -> GfxResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let handle = state.alloc(ObjectKind::Semaphore);
        state.semaphores.insert(handle, false);
        Ok(vk::Semaphore::from_raw(handle))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        let handle = semaphore.as_raw();
        if state.release("vkDestroySemaphore", ObjectKind::Semaphore, handle) {
            state.semaphores.remove(&handle);
        }
    }

    fn create_command_pool(&self) -> GfxResult<vk::CommandPool> {
        let mut state = self.state.lock();
        Ok(vk::CommandPool::from_raw(state.alloc(ObjectKind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let handle = pool.as_raw();
        if state.release("vkDestroyCommandPool", ObjectKind::CommandPool, handle) {
            let freed: Vec<u64> = state
                .command_buffers
                .iter()
                .filter(|(_, cmd)| cmd.pool == handle)
                .map(|(&h, _)| h)
                .collect();
            for cmd in freed {
                state.command_buffers.remove(&cmd);
                state.live.remove(&cmd);
            }
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> GfxResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        state.expect_live("vkAllocateCommandBuffers", ObjectKind::CommandPool, pool.as_raw())?;
        let handle = state.alloc(ObjectKind::CommandBuffer);
        state.command_buffers.insert(
            handle,
            CommandBufferState {
                pool: pool.as_raw(),
                ..Default::default()
            },
        );
        Ok(vk::CommandBuffer::from_raw(handle))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        const CALL: &str = "vkFreeCommandBuffers";
        let mut state = self.state.lock();
        let handle = command_buffer.as_raw();
        if state.command_buffer_in_flight(handle) {
            state.violation(CALL, format!("command buffer {:#x} is still executing", handle));
        }
        if state.command_buffers.get(&handle).map(|c| c.pool) != Some(pool.as_raw()) {
            state.violation(CALL, format!("command buffer {:#x} is not from this pool", handle));
        }
        if state.release(CALL, ObjectKind::CommandBuffer, handle) {
            state.command_buffers.remove(&handle);
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _one_time: bool,
    ) -> GfxResult<()> {
        const CALL: &str = "vkBeginCommandBuffer";
        let mut state = self.state.lock();
        let handle = command_buffer.as_raw();
        state.calls.push(DriverCall::BeginCommandBuffer(handle));
        if state.command_buffer_in_flight(handle) {
            return Err(state.violation(
                CALL,
                format!("command buffer {:#x} is still executing", handle),
            ));
        }
        let recording = state.command_buffers.get(&handle).map(|c| c.recording);
        match recording {
            Some(false) => {
                if let Some(cmd) = state.command_buffers.get_mut(&handle) {
                    cmd.recording = true;
                    cmd.executable = false;
                    cmd.commands.clear();
                }
                Ok(())
            }
            Some(true) => Err(state.violation(CALL, format!("{:#x} is already recording", handle))),
            None => Err(state.violation(CALL, format!("unknown command buffer {:#x}", handle))),
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        const CALL: &str = "vkEndCommandBuffer";
        let mut state = self.state.lock();
        let handle = command_buffer.as_raw();
        state.calls.push(DriverCall::EndCommandBuffer(handle));
        let recording = state.command_buffers.get(&handle).map_or(false, |c| c.recording);
        if !recording {
            return Err(state.violation(CALL, format!("{:#x} is not recording", handle)));
        }
        if let Some(cmd) = state.command_buffers.get_mut(&handle) {
            cmd.recording = false;
            cmd.executable = true;
        }
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        const CALL: &str = "vkResetCommandBuffer";
        let mut state = self.state.lock();
        let handle = command_buffer.as_raw();
        state.calls.push(DriverCall::ResetCommandBuffer(handle));
        if state.command_buffer_in_flight(handle) {
            return Err(state.violation(
                CALL,
                format!("command buffer {:#x} reset while its fence is pending", handle),
            ));
        }
        let reset = state
            .command_buffers
            .get_mut(&handle)
            .map(|cmd| *cmd = CommandBufferState {
                pool: cmd.pool,
                ..Default::default()
            })
            .is_some();
        if reset {
            Ok(())
        } else {
            Err(state.violation(CALL, format!("unknown command buffer {:#x}", handle)))
        }
    }

    fn queue_submit(&self, submit: &SubmitDesc) -> GfxResult<()> {
        const CALL: &str = "vkQueueSubmit";
        let mut state = self.state.lock();
        let cmd = submit.command_buffer.as_raw();
        let fence = submit.fence.as_raw();
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(GfxError::OutOfMemory(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }

        let executable = state.command_buffers.get(&cmd).map_or(false, |c| c.executable);
        if !executable || state.command_buffer_in_flight(cmd) {
            return Err(state.violation(
                CALL,
                format!("command buffer {:#x} is not ready for submission", cmd),
            ));
        }
        if fence != 0 && state.fences.get(&fence) != Some(&FenceState::Unsignaled) {
            return Err(state.violation(CALL, format!("fence {:#x} is not unsignaled", fence)));
        }
        if let Some((wait, _)) = submit.wait {
            if state.semaphores.get(&wait.as_raw()) != Some(&true) {
                return Err(state.violation(CALL, "wait semaphore is not signaled".into()));
            }
        }
        if let Some(signal) = submit.signal {
            if state.semaphores.get(&signal.as_raw()) != Some(&false) {
                return Err(state.violation(CALL, "signal semaphore is already signaled".into()));
            }
        }

        let commands = state
            .command_buffers
            .get_mut(&cmd)
            .map(|c| c.commands.clone())
            .unwrap_or_default();
        state.execute(commands)?;

        if let Some((wait, _)) = submit.wait {
            state.semaphores.insert(wait.as_raw(), false);
        }
        if let Some(signal) = submit.signal {
            state.semaphores.insert(signal.as_raw(), true);
        }
        if fence != 0 {
            state.fences.insert(fence, FenceState::Pending);
        }
        if let Some(c) = state.command_buffers.get_mut(&cmd) {
            c.in_flight = (fence != 0).then_some(fence);
        }
        state.submits += 1;
        state.calls.push(DriverCall::Submit {
            command_buffer: cmd,
            fence,
        });
        Ok(())
    }

    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        const CALL: &str = "vkCmdPipelineBarrier2";
        let mut state = self.state.lock();
        state.record(CALL, command_buffer.as_raw(), None);
        state.calls.push(DriverCall::Barrier(*barrier));

        let image = barrier.image.as_raw();
        let current = state.images.get(&image).map(|i| i.layout);
        match current {
            Some(layout) => {
                if barrier.old_layout != vk::ImageLayout::UNDEFINED && barrier.old_layout != layout {
                    state.violation(
                        CALL,
                        format!(
                            "image {:#x} is in {:?}, barrier claims {:?}",
                            image, layout, barrier.old_layout
                        ),
                    );
                }
                if let Some(record) = state.images.get_mut(&image) {
                    record.layout = barrier.new_layout;
                }
            }
            None => {
                state.violation(CALL, format!("unknown image {:#x}", image));
            }
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::CopyBuffer {
            src: src.as_raw(),
            dst: dst.as_raw(),
        });
        state.record(
            "vkCmdCopyBuffer",
            command_buffer.as_raw(),
            Some(Command::CopyBuffer {
                src: src.as_raw(),
                dst: dst.as_raw(),
                regions: regions.to_vec(),
            }),
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        const CALL: &str = "vkCmdCopyBufferToImage";
        let mut state = self.state.lock();
        state.calls.push(DriverCall::CopyBufferToImage {
            src: src.as_raw(),
            dst: dst.as_raw(),
        });
        let layout = state.images.get(&dst.as_raw()).map(|i| i.layout);
        if layout != Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL) {
            state.violation(
                CALL,
                format!("destination image is in {:?}, not TRANSFER_DST_OPTIMAL", layout),
            );
        }
        state.record(
            CALL,
            command_buffer.as_raw(),
            Some(Command::CopyBufferToImage {
                src: src.as_raw(),
                dst: dst.as_raw(),
                regions: regions.to_vec(),
            }),
        );
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> GfxResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        if max_sets == 0 || sizes.is_empty() {
            return Err(state.violation(
                "vkCreateDescriptorPool",
                "empty descriptor pool".into(),
            ));
        }
        Ok(vk::DescriptorPool::from_raw(
            state.alloc(ObjectKind::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state
            .lock()
            .release("vkDestroyDescriptorPool", ObjectKind::DescriptorPool, pool.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> GfxResult<vk::ShaderModule> {
        let mut state = self.state.lock();
        if code.is_empty() {
            return Err(state.violation("vkCreateShaderModule", "empty code".into()));
        }
        Ok(vk::ShaderModule::from_raw(state.alloc(ObjectKind::ShaderModule)))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state
            .lock()
            .release("vkDestroyShaderModule", ObjectKind::ShaderModule, module.as_raw());
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> GfxResult<vk::Buffer> {
        let mut state = self.state.lock();
        if size == 0 {
            return Err(state.violation("vkCreateBuffer", "zero-sized buffer".into()));
        }
        let handle = state.alloc(ObjectKind::Buffer);
        state.buffers.insert(handle, BufferState { size, memory: None });
        Ok(vk::Buffer::from_raw(handle))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock();
        vk::MemoryRequirements {
            size: state.buffers.get(&buffer.as_raw()).map_or(0, |b| b.size),
            alignment: 16,
            memory_type_bits: state.config.buffer_memory_type_bits,
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> GfxResult<()> {
        const CALL: &str = "vkBindBufferMemory";
        let mut state = self.state.lock();
        let bits = state.config.buffer_memory_type_bits;
        let allocation = state
            .memory
            .get(&memory.as_raw())
            .map(|m| (m.type_index, m.bytes.len() as u64));
        let size = state.buffers.get(&buffer.as_raw()).map(|b| b.size);
        match (allocation, size) {
            (Some((type_index, len)), Some(size)) if bits & (1u32 << type_index) != 0 && len >= size => {
                if let Some(b) = state.buffers.get_mut(&buffer.as_raw()) {
                    b.memory = Some(memory.as_raw());
                }
                Ok(())
            }
            _ => Err(state.violation(CALL, "incompatible buffer memory".into())),
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.release("vkDestroyBuffer", ObjectKind::Buffer, buffer.as_raw()) {
            state.buffers.remove(&buffer.as_raw());
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> GfxResult<vk::Image> {
        let mut state = self.state.lock();
        if desc.mip_levels == 0 || desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(state.violation("vkCreateImage", format!("invalid image {:?}", desc)));
        }
        let handle = state.alloc(ObjectKind::Image);
        state.images.insert(
            handle,
            ImageRecord {
                desc: *desc,
                memory: None,
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(vk::Image::from_raw(handle))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let size = state.images.get(&image.as_raw()).map_or(0, |i| {
            let texel = texel_size(i.desc.format).unwrap_or(4);
            mip_offset(&i.desc, i.desc.mip_levels, texel)
        });
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: state.config.image_memory_type_bits,
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> GfxResult<()> {
        let mut state = self.state.lock();
        let bits = state.config.image_memory_type_bits;
        let type_index = state.memory.get(&memory.as_raw()).map(|m| m.type_index);
        let compatible = type_index.map_or(false, |t| bits & (1u32 << t) != 0);
        match state.images.get_mut(&image.as_raw()) {
            Some(record) if compatible => {
                record.memory = Some(memory.as_raw());
                return Ok(());
            }
            _ => {}
        }
        Err(state.violation("vkBindImageMemory", "incompatible image memory".into()))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if state.release("vkDestroyImage", ObjectKind::Image, image.as_raw()) {
            state.images.remove(&image.as_raw());
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> GfxResult<vk::ImageView> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&desc.image.as_raw()) {
            return Err(state.violation(
                "vkCreateImageView",
                format!("unknown image {:#x}", desc.image.as_raw()),
            ));
        }
        Ok(vk::ImageView::from_raw(state.alloc(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state
            .lock()
            .release("vkDestroyImageView", ObjectKind::ImageView, view.as_raw());
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        type_index: u32,
    ) -> GfxResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        if type_index as usize >= state.config.memory_types.len() {
            return Err(state.violation(
                "vkAllocateMemory",
                format!("memory type {} does not exist", type_index),
            ));
        }
        let handle = state.alloc(ObjectKind::Memory);
        state.memory.insert(
            handle,
            MemoryState {
                type_index,
                bytes: vec![0u8; size as usize].into_boxed_slice(),
                mapped: false,
            },
        );
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        if state.release("vkFreeMemory", ObjectKind::Memory, memory.as_raw()) {
            state.memory.remove(&memory.as_raw());
        }
    }

    fn map_memory(&self, memory: vk::DeviceMemory) -> GfxResult<NonNull<u8>> {
        const CALL: &str = "vkMapMemory";
        let mut state = self.state.lock();
        let host_visible = state
            .memory
            .get(&memory.as_raw())
            .map(|m| (m.type_index, m.mapped))
            .map(|(type_index, mapped)| {
                let flags = state.config.memory_types[type_index as usize];
                (flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE), mapped)
            });
        match host_visible {
            Some((true, false)) => {}
            Some((false, _)) => {
                return Err(state.violation(CALL, "memory is not host-visible".into()))
            }
            Some((true, true)) => return Err(state.violation(CALL, "memory is already mapped".into())),
            None => return Err(state.violation(CALL, "unknown memory".into())),
        }
        match state.memory.get_mut(&memory.as_raw()) {
            Some(m) => {
                m.mapped = true;
                // Boxed storage never moves, so the pointer stays valid until freed.
                NonNull::new(m.bytes.as_mut_ptr()).ok_or_else(|| validation_failed(CALL))
            }
            None => Err(validation_failed(CALL)),
        }
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        let was_mapped = state
            .memory
            .get_mut(&memory.as_raw())
            .map(|m| std::mem::replace(&mut m.mapped, false));
        if was_mapped != Some(true) {
            state.violation("vkUnmapMemory", "memory is not mapped".into());
        }
    }

    fn flush_memory(&self, memory: vk::DeviceMemory) -> GfxResult<()> {
        let mut state = self.state.lock();
        let mapped = state.memory.get(&memory.as_raw()).map_or(false, |m| m.mapped);
        if mapped {
            Ok(())
        } else {
            Err(state.violation(
                "vkFlushMappedMemoryRanges",
                "memory is not mapped".into(),
            ))
        }
    }
}

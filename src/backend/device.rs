// Graphics device - the context every demo renders through
//
// Responsibilities:
// - Capability query (Vulkan 1.3 or the legacy path), evaluated once
// - Swapchain, command pool, descriptor pool and frame ring lifetime
// - Frame sequencing: new_frame / submit
// - Resource creation through the allocator
//
// Teardown runs in strict reverse-dependency order and only once, whether it
// is triggered by shutdown() or by Drop.

use ash::vk;

use super::allocator::ResourceAllocator;
use super::buffer::GpuBuffer;
use super::driver::{GpuDriver, ImageBarrier};
use super::image::GpuImage;
use super::memory::MemoryTypeTable;
use super::shader;
use super::swapchain::SwapchainManager;
use super::sync::{FrameInfo, FrameScheduler, FrameStatus, PresentStatus};
use super::texture::{build_mip_chain_rgba8, MipLevel};
use crate::config::GraphicsConfig;
use crate::error::{GfxError, GfxResult};

/// Fixed capacity per descriptor type. The pool never grows.
pub const DESCRIPTORS_PER_TYPE: u32 = 10_000;
pub const MAX_DESCRIPTOR_SETS: u32 = 10_000;

const POOLED_DESCRIPTOR_TYPES: [vk::DescriptorType; 5] = [
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::STORAGE_IMAGE,
];

/// What the device can do. Fixed between initialize and shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub api_version: u32,
    /// Dynamic rendering + synchronization2 in core.
    pub vulkan13: bool,
}

impl DeviceCapabilities {
    pub fn from_api_version(api_version: u32) -> Self {
        Self {
            api_version,
            vulkan13: api_version >= vk::API_VERSION_1_3,
        }
    }
}

pub struct GfxDevice<D: GpuDriver> {
    driver: D,
    capabilities: DeviceCapabilities,
    swapchain: SwapchainManager,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    frames: FrameScheduler,
    allocator: ResourceAllocator,
    recreate_after_out_of_date: u32,
    alive: bool,
}

impl<D: GpuDriver> GfxDevice<D> {
    /// Build the swapchain, command pool, descriptor pool and frame ring on `driver`.
    ///
    /// If any step fails, everything built so far is destroyed along with the
    /// driver's own objects.
    pub fn initialize(
        driver: D,
        config: &GraphicsConfig,
        width: u32,
        height: u32,
    ) -> GfxResult<Self> {
        let capabilities = DeviceCapabilities::from_api_version(driver.api_version());
        log::info!(
            "Initializing graphics device: Vulkan {}.{}.{} ({} path), {:?} platform",
            vk::api_version_major(capabilities.api_version),
            vk::api_version_minor(capabilities.api_version),
            vk::api_version_patch(capabilities.api_version),
            if capabilities.vulkan13 {
                "dynamic rendering"
            } else {
                "legacy"
            },
            driver.platform()
        );

        let memory_types = MemoryTypeTable::from_properties(&driver.memory_properties());
        let mut device = Self {
            driver,
            capabilities,
            swapchain: SwapchainManager::empty(),
            command_pool: vk::CommandPool::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            frames: FrameScheduler::empty(),
            allocator: ResourceAllocator::new(memory_types, vk::CommandPool::null()),
            recreate_after_out_of_date: config.recreate_after_out_of_date,
            alive: true,
        };

        // On error `device` drops here and tears down whatever exists.
        device.build(width, height)?;
        Ok(device)
    }

    fn build(&mut self, width: u32, height: u32) -> GfxResult<()> {
        self.swapchain = SwapchainManager::create(&self.driver, width, height)?;

        self.command_pool = self.driver.create_command_pool()?;
        self.allocator = ResourceAllocator::new(
            self.allocator.memory_types().clone(),
            self.command_pool,
        );

        let sizes: Vec<vk::DescriptorPoolSize> = POOLED_DESCRIPTOR_TYPES
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            })
            .collect();
        self.descriptor_pool = self
            .driver
            .create_descriptor_pool(MAX_DESCRIPTOR_SETS, &sizes)?;

        self.frames = FrameScheduler::create(&self.driver, self.command_pool)?;
        Ok(())
    }

    /// Wait for idle and destroy everything, including the driver's objects.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;

        log::info!("Shutting down graphics device...");
        if let Err(e) = self.driver.wait_idle() {
            log::error!("wait_idle failed during shutdown: {}", e);
        }

        self.frames.destroy(&self.driver, self.command_pool);
        if self.descriptor_pool != vk::DescriptorPool::null() {
            self.driver.destroy_descriptor_pool(self.descriptor_pool);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        if self.command_pool != vk::CommandPool::null() {
            self.driver.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }
        self.swapchain.destroy(&self.driver);
        self.driver.destroy();
    }

    // =========================================================================
    // FRAMES
    // =========================================================================

    /// Start a frame: wait for the slot, acquire an image, begin recording.
    ///
    /// An out-of-date swapchain skips the frame. After
    /// `recreate_after_out_of_date` skips in a row the swapchain is rebuilt at
    /// its current size, so presentation cannot stall waiting for a resize
    /// event that never comes.
    pub fn new_frame(&mut self) -> GfxResult<FrameStatus> {
        let status = self.frames.new_frame(&self.driver, &mut self.swapchain)?;
        if status == FrameStatus::Skipped
            && self.recreate_after_out_of_date > 0
            && self.frames.out_of_date_streak() >= self.recreate_after_out_of_date
        {
            let extent = self.swapchain.extent();
            log::warn!(
                "Swapchain out of date for {} frames, recreating at {}x{}",
                self.frames.out_of_date_streak(),
                extent.width,
                extent.height
            );
            self.frames.reset_out_of_date_streak();
            self.swapchain
                .recreate(&self.driver, extent.width, extent.height)?;
        }
        Ok(status)
    }

    /// Submit the frame started by `new_frame` and present it.
    pub fn submit(&mut self) -> GfxResult<PresentStatus> {
        self.frames.submit(&self.driver, &self.swapchain)
    }

    /// Barrier for the acquired swapchain image from its tracked state.
    pub fn transition_swapchain_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
        new_access: vk::AccessFlags2,
    ) -> GfxResult<ImageBarrier> {
        self.swapchain
            .transition_current_image(&self.driver, command_buffer, new_layout, new_access)
    }

    /// Rebuild the swapchain at the given size.
    ///
    /// Not allowed between `new_frame` and `submit`: the acquired image
    /// belongs to the chain being replaced.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> GfxResult<()> {
        if self.frames.current_frame().is_some() {
            return Err(GfxError::InvalidArgument(
                "swapchain recreated while a frame is being recorded".into(),
            ));
        }
        self.swapchain.recreate(&self.driver, width, height)
    }

    /// Recreate the swapchain if the window size no longer matches it.
    ///
    /// Returns whether a recreation happened. A zero-sized window (minimised)
    /// is left alone.
    pub fn handle_surface_resize(&mut self, width: u32, height: u32) -> GfxResult<bool> {
        if width == 0 || height == 0 {
            return Ok(false);
        }
        let current = self.swapchain.extent();
        if current.width == width && current.height == height {
            return Ok(false);
        }
        log::info!(
            "Surface resized {}x{} -> {}x{}",
            current.width,
            current.height,
            width,
            height
        );
        self.recreate_swapchain(width, height)?;
        Ok(true)
    }

    pub fn wait_for_idle(&self) -> GfxResult<()> {
        self.driver.wait_idle()
    }

    // =========================================================================
    // RESOURCES
    // =========================================================================

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        src: Option<&[u8]>,
    ) -> GfxResult<GpuBuffer> {
        self.allocator
            .create_buffer(&self.driver, size, usage, memory_flags, src)
    }

    pub fn destroy_buffer(&self, buffer: GpuBuffer) {
        self.allocator.destroy_buffer(&self.driver, buffer);
    }

    pub fn create_image_2d(
        &self,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> GfxResult<GpuImage> {
        self.allocator.create_image_2d(
            &self.driver,
            vk::Extent2D { width, height },
            mip_levels,
            format,
            usage,
            memory_flags,
        )
    }

    pub fn destroy_image(&self, image: GpuImage) {
        self.allocator.destroy_image(&self.driver, image);
    }

    pub fn upload_texture(&self, image: &mut GpuImage, levels: &[MipLevel]) -> GfxResult<()> {
        self.allocator.upload_texture(&self.driver, image, levels)
    }

    /// Sampled, device-local RGBA8 texture with a full mip chain.
    pub fn create_texture_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> GfxResult<GpuImage> {
        let levels = build_mip_chain_rgba8(width, height, pixels)?;
        let mut image = self.create_image_2d(
            width,
            height,
            levels.len() as u32,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if let Err(e) = self.upload_texture(&mut image, &levels) {
            self.destroy_image(image);
            return Err(e);
        }
        Ok(image)
    }

    pub fn begin_one_shot(&self) -> GfxResult<vk::CommandBuffer> {
        self.allocator.begin_one_shot(&self.driver)
    }

    pub fn submit_one_shot(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        self.allocator.submit_one_shot(&self.driver, command_buffer)
    }

    pub fn create_shader_module(&self, bytes: &[u8]) -> GfxResult<vk::ShaderModule> {
        shader::create_shader_module(&self.driver, bytes)
    }

    pub fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.driver.destroy_shader_module(module);
    }

    /// Label an object for debuggers and validation messages.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        self.driver
            .set_object_name(handle.as_raw(), H::TYPE, name);
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    pub fn is_support_vulkan13(&self) -> bool {
        self.capabilities.vulkan13
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn frame_index(&self) -> u32 {
        self.frames.frame_index()
    }

    /// The frame being recorded, if any.
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.frames.current_frame()
    }

    pub fn frames(&self) -> &FrameScheduler {
        &self.frames
    }

    pub fn swapchain_resolution(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn swapchain_image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    pub fn swapchain_image_view(&self, index: u32) -> Option<vk::ImageView> {
        self.swapchain.image_view(index)
    }

    pub fn current_swapchain_image(&self) -> vk::Image {
        self.swapchain.current_image()
    }

    pub fn current_swapchain_image_view(&self) -> vk::ImageView {
        self.swapchain.current_view()
    }

    pub fn current_swapchain_index(&self) -> u32 {
        self.swapchain.current_index()
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.driver.graphics_queue_family()
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn memory_types(&self) -> &MemoryTypeTable {
        self.allocator.memory_types()
    }
}

impl<D: GpuDriver> Drop for GfxDevice<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<D: GpuDriver> std::fmt::Debug for GfxDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxDevice")
            .field("capabilities", &self.capabilities)
            .field("extent", &self.swapchain.extent())
            .field("frame_index", &self.frames.frame_index())
            .field("alive", &self.alive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan13_threshold() {
        assert!(!DeviceCapabilities::from_api_version(vk::API_VERSION_1_2).vulkan13);
        assert!(DeviceCapabilities::from_api_version(vk::API_VERSION_1_3).vulkan13);
        assert!(DeviceCapabilities::from_api_version(vk::make_api_version(0, 1, 3, 250)).vulkan13);
        assert!(!DeviceCapabilities::from_api_version(vk::make_api_version(0, 1, 2, 999)).vulkan13);
    }

    #[test]
    fn pool_covers_every_descriptor_type_used_by_the_demos() {
        assert!(POOLED_DESCRIPTOR_TYPES.contains(&vk::DescriptorType::STORAGE_IMAGE));
        assert!(POOLED_DESCRIPTOR_TYPES.contains(&vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
        assert_eq!(DESCRIPTORS_PER_TYPE, 10_000);
    }
}

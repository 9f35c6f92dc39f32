// Driver seam - every Vulkan call the device core issues
//
// The device context, swapchain manager, frame scheduler and resource
// allocator are generic over GpuDriver. VulkanDriver talks to the real API
// through ash; DummyDriver simulates it for tests.

use ash::vk;
use std::ptr::NonNull;

use super::surface::PlatformKind;
use crate::error::GfxResult;

/// Parameters for `vkCreateSwapchainKHR`.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// 2D image creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

/// A single `VkImageMemoryBarrier2` covering every mip level of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// One command buffer submission on the graphics queue.
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Thin, stateless wrapper over the Vulkan entry points used by the core.
///
/// Methods mirror the Vulkan call they wrap. Out-of-date swapchains are
/// reported as `GfxError::SwapchainOutOfDate`.
pub trait GpuDriver {
    // ── Device ──────────────────────────────────────────────────────────
    fn api_version(&self) -> u32;
    fn platform(&self) -> PlatformKind;
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn graphics_queue_family(&self) -> u32;
    fn wait_idle(&self) -> GfxResult<()>;
    fn set_object_name(&self, handle: u64, object_type: vk::ObjectType, name: &str);

    /// Destroy the logical device, surface, debug messenger and instance, in
    /// that order. Everything created through the driver must be gone first.
    fn destroy(&mut self);

    // ── Surface ─────────────────────────────────────────────────────────
    fn surface_supports_present(&self) -> GfxResult<bool>;
    fn surface_capabilities(&self) -> GfxResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> GfxResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> GfxResult<Vec<vk::PresentModeKHR>>;

    // ── Swapchain ───────────────────────────────────────────────────────
    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GfxResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> GfxResult<(u32, bool)>;
    /// Returns `true` when the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GfxResult<bool>;

    // ── Synchronization ─────────────────────────────────────────────────
    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence>;
    /// Host wait with unbounded timeout.
    fn wait_fence(&self, fence: vk::Fence) -> GfxResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> GfxResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> GfxResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ── Commands ────────────────────────────────────────────────────────
    fn create_command_pool(&self) -> GfxResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> GfxResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, one_time: bool)
        -> GfxResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()>;
    fn queue_submit(&self, submit: &SubmitDesc) -> GfxResult<()>;
    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier);
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    );

    // ── Descriptors / shaders ───────────────────────────────────────────
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> GfxResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn create_shader_module(&self, code: &[u32]) -> GfxResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    // ── Memory and resources ────────────────────────────────────────────
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags)
        -> GfxResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> GfxResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_image(&self, desc: &ImageDesc) -> GfxResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> GfxResult<()>;
    fn destroy_image(&self, image: vk::Image);

    fn create_image_view(&self, desc: &ImageViewDesc) -> GfxResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn allocate_memory(&self, size: vk::DeviceSize, type_index: u32)
        -> GfxResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Map the whole allocation.
    fn map_memory(&self, memory: vk::DeviceMemory) -> GfxResult<NonNull<u8>>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn flush_memory(&self, memory: vk::DeviceMemory) -> GfxResult<()>;
}

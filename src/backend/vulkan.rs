// Vulkan driver - the ash implementation of GpuDriver
//
// Responsibilities:
// - Instance creation with validation layers (debug builds, desktop only)
// - Surface creation through the PlatformSurface collaborator
// - Physical device selection (first device with a graphics queue)
// - Logical device + queue creation, synchronization2 on every path
// - Extension loaders for surface, swapchain and debug utils

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::ptr::NonNull;

use super::debug;
use super::driver::{GpuDriver, ImageBarrier, ImageDesc, ImageViewDesc, SubmitDesc, SwapchainDesc};
use super::surface::{PlatformKind, PlatformSurface};
use crate::config::DebugConfig;
use crate::error::{GfxError, GfxResult, VkResultExt};

/// Owns the instance, surface, logical device and graphics queue.
pub struct VulkanDriver {
    _entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    object_names: bool,

    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,

    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,

    swapchain_loader: khr::Swapchain,
    // Only loaded below 1.3, where synchronization2 is an extension
    sync2: Option<khr::Synchronization2>,

    api_version: u32,
    platform: PlatformKind,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    destroyed: bool,
}

/// Objects created during bring-up, torn down in reverse if a later step fails.
struct Partial {
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Partial {
    unsafe fn destroy(self) {
        if self.surface != vk::SurfaceKHR::null() {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        if let Some((debug_utils, messenger)) = self.debug_utils {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

impl VulkanDriver {
    /// Bring up Vulkan for one window.
    ///
    /// # Safety
    /// The window behind `surface` must outlive the driver.
    pub unsafe fn open(
        app_name: &str,
        debug: &DebugConfig,
        surface: &dyn PlatformSurface,
    ) -> GfxResult<Self> {
        log::info!("Creating Vulkan device: {}", app_name);
        let platform = surface.kind();

        // Step 1: Load Vulkan library
        let entry = Entry::load().map_err(|e| GfxError::Loading(e.to_string()))?;

        // Step 2: Create instance
        let validation = cfg!(debug_assertions)
            && debug.validation_layers
            && platform.allows_validation()
            && debug::validation_layer_available(&entry);
        if debug.validation_layers && cfg!(debug_assertions) && !validation {
            log::warn!("Validation layers requested but unavailable on this platform");
        }
        let debug_utils_wanted = validation || debug.object_names;
        let instance = Self::create_instance(&entry, app_name, surface, validation, debug_utils_wanted)?;

        // Step 3: Setup debug messenger
        let debug_utils = if debug_utils_wanted {
            match debug::create_messenger(&entry, &instance) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Step 4: Create surface
        let mut partial = Partial {
            surface_loader: khr::Surface::new(&entry, &instance),
            instance,
            debug_utils,
            surface: vk::SurfaceKHR::null(),
        };
        match surface.create_surface(&entry, &partial.instance) {
            Ok(handle) => partial.surface = handle,
            Err(e) => {
                partial.destroy();
                return Err(e);
            }
        }

        // Steps 5-6: Pick physical device, create logical device
        let opened = Self::pick_physical_device(&partial.instance).and_then(|(pd, family)| {
            let api_version = Self::effective_api_version(&entry, &partial.instance, pd);
            Self::create_logical_device(&partial.instance, pd, family, api_version)
                .map(|(device, sync2_ext)| (pd, family, api_version, device, sync2_ext))
        });
        let (physical_device, graphics_queue_family, api_version, device, sync2_ext) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                partial.destroy();
                return Err(e);
            }
        };

        let graphics_queue = device.get_device_queue(graphics_queue_family, 0);
        let swapchain_loader = khr::Swapchain::new(&partial.instance, &device);
        let sync2 = sync2_ext.then(|| khr::Synchronization2::new(&partial.instance, &device));

        // Step 7: Cache device properties
        let properties = partial.instance.get_physical_device_properties(physical_device);
        let memory_properties = partial
            .instance
            .get_physical_device_memory_properties(physical_device);

        log::info!(
            "Selected GPU: {}",
            CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            vk::api_version_patch(api_version)
        );

        let Partial {
            instance,
            debug_utils,
            surface_loader,
            surface,
        } = partial;

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
            object_names: debug.object_names,
            surface_loader,
            surface,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            swapchain_loader,
            sync2,
            api_version,
            platform,
            memory_properties,
            destroyed: false,
        })
    }

    unsafe fn create_instance(
        entry: &Entry,
        app_name: &str,
        surface: &dyn PlatformSurface,
        validation: bool,
        debug_utils: bool,
    ) -> GfxResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|_| GfxError::InvalidArgument("application name contains NUL".into()))?;
        let engine_name = c"gfx-device";

        // A 1.0 loader rejects any higher version in VkApplicationInfo
        let loader_version = entry
            .try_enumerate_instance_version()
            .ok()
            .flatten()
            .unwrap_or(vk::API_VERSION_1_0);
        let requested = if loader_version >= vk::API_VERSION_1_1 {
            vk::API_VERSION_1_3
        } else {
            vk::API_VERSION_1_0
        };

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(requested);

        let mut extensions: Vec<*const std::ffi::c_char> = surface
            .required_extensions()?
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        extensions.push(khr::GetPhysicalDeviceProperties2::name().as_ptr());
        if debug_utils {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            log::info!("Enabling {}", debug::VALIDATION_LAYER.to_string_lossy());
            vec![debug::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        entry
            .create_instance(&create_info, None)
            .map_err(|result| match result {
                vk::Result::ERROR_EXTENSION_NOT_PRESENT | vk::Result::ERROR_LAYER_NOT_PRESENT => {
                    GfxError::unsupported(format!("instance extension or layer missing ({:?})", result))
                }
                vk::Result::ERROR_INCOMPATIBLE_DRIVER => {
                    GfxError::unsupported("no compatible Vulkan driver")
                }
                other => GfxError::Vulkan {
                    call: "vkCreateInstance",
                    result: other,
                },
            })
    }

    /// First enumerated device exposing a graphics queue, and its first such family.
    unsafe fn pick_physical_device(instance: &ash::Instance) -> GfxResult<(vk::PhysicalDevice, u32)> {
        let devices = instance
            .enumerate_physical_devices()
            .vk_context("vkEnumeratePhysicalDevices")?;

        if devices.is_empty() {
            return Err(GfxError::unsupported("no Vulkan-capable GPU found"));
        }

        devices
            .into_iter()
            .find_map(|device| {
                instance
                    .get_physical_device_queue_family_properties(device)
                    .iter()
                    .position(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|family| (device, family as u32))
            })
            .ok_or_else(|| GfxError::unsupported("no GPU exposes a graphics queue family"))
    }

    unsafe fn effective_api_version(
        entry: &Entry,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> u32 {
        let device_version = instance
            .get_physical_device_properties(physical_device)
            .api_version;
        let loader_version = entry
            .try_enumerate_instance_version()
            .ok()
            .flatten()
            .unwrap_or(vk::API_VERSION_1_0);
        device_version.min(loader_version).min(vk::API_VERSION_1_3)
    }

    unsafe fn device_supports_extension(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        name: &CStr,
    ) -> GfxResult<bool> {
        let available = instance
            .enumerate_device_extension_properties(physical_device)
            .vk_context("vkEnumerateDeviceExtensionProperties")?;
        Ok(available
            .iter()
            .any(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == name))
    }

    /// Returns the device and whether synchronization2 came from the KHR extension.
    unsafe fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        api_version: u32,
    ) -> GfxResult<(ash::Device, bool)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let mut extensions = vec![khr::Swapchain::name().as_ptr()];
        if !Self::device_supports_extension(instance, physical_device, khr::Swapchain::name())? {
            return Err(GfxError::unsupported("device lacks VK_KHR_swapchain"));
        }

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info));

        let (result, sync2_ext) = if api_version >= vk::API_VERSION_1_3 {
            let mut supported13 = vk::PhysicalDeviceVulkan13Features::default();
            let mut supported = vk::PhysicalDeviceFeatures2::builder().push_next(&mut supported13);
            instance.get_physical_device_features2(physical_device, &mut supported);
            if supported13.synchronization2 == vk::FALSE {
                return Err(GfxError::unsupported("device lacks synchronization2"));
            }

            let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
                .dynamic_rendering(supported13.dynamic_rendering == vk::TRUE)
                .synchronization2(true)
                .maintenance4(supported13.maintenance4 == vk::TRUE);
            let create_info = create_info
                .enabled_extension_names(&extensions)
                .push_next(&mut features13);
            (instance.create_device(physical_device, &create_info, None), false)
        } else {
            if !Self::device_supports_extension(instance, physical_device, khr::Synchronization2::name())? {
                return Err(GfxError::unsupported("device lacks VK_KHR_synchronization2"));
            }
            let mut supported_sync2 = vk::PhysicalDeviceSynchronization2Features::default();
            let mut supported = vk::PhysicalDeviceFeatures2::builder().push_next(&mut supported_sync2);
            instance.get_physical_device_features2(physical_device, &mut supported);
            if supported_sync2.synchronization2 == vk::FALSE {
                return Err(GfxError::unsupported("device lacks synchronization2"));
            }

            extensions.push(khr::Synchronization2::name().as_ptr());
            let mut sync2 = vk::PhysicalDeviceSynchronization2Features::builder().synchronization2(true);
            let create_info = create_info
                .enabled_extension_names(&extensions)
                .push_next(&mut sync2);
            (instance.create_device(physical_device, &create_info, None), true)
        };

        let device = result.map_err(|result| match result {
            vk::Result::ERROR_FEATURE_NOT_PRESENT | vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
                GfxError::unsupported(format!("device feature or extension missing ({:?})", result))
            }
            other => GfxError::Vulkan {
                call: "vkCreateDevice",
                result: other,
            },
        })?;

        Ok((device, sync2_ext))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl GpuDriver for VulkanDriver {
    fn api_version(&self) -> u32 {
        self.api_version
    }

    fn platform(&self) -> PlatformKind {
        self.platform
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle() }.vk_context("vkDeviceWaitIdle")
    }

    fn set_object_name(&self, handle: u64, object_type: vk::ObjectType, name: &str) {
        if !self.object_names {
            return;
        }
        let Some((debug_utils, _)) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(object_type)
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(self.device.handle(), &info) } {
            log::debug!("Failed to name {:?} {:#x}: {:?}", object_type, handle, e);
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        log::info!("Destroying Vulkan device...");

        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }

    fn surface_supports_present(&self) -> GfxResult<bool> {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.graphics_queue_family,
                self.surface,
            )
        }
        .vk_context("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    fn surface_capabilities(&self) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    fn surface_formats(&self) -> GfxResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    fn surface_present_modes(&self) -> GfxResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(desc.composite_alpha)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .vk_context("vkCreateSwapchainKHR")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GfxResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .vk_context("vkGetSwapchainImagesKHR")
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> GfxResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
        .vk_context("vkAcquireNextImageKHR")
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GfxResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.graphics_queue, &present_info)
        }
        .vk_context("vkQueuePresentKHR")
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&create_info, None) }.vk_context("vkCreateFence")
    }

    fn wait_fence(&self, fence: vk::Fence) -> GfxResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .vk_context("vkWaitForFences")
    }

    fn reset_fence(&self, fence: vk::Fence) -> GfxResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.vk_context("vkResetFences")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn create_semaphore(&self) -> GfxResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&create_info, None) }
            .vk_context("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self) -> GfxResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_queue_family);
        unsafe { self.device.create_command_pool(&create_info, None) }
            .vk_context("vkCreateCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> GfxResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .vk_context("vkAllocateCommandBuffers")?;
        buffers.into_iter().next().ok_or(GfxError::Vulkan {
            call: "vkAllocateCommandBuffers",
            result: vk::Result::ERROR_UNKNOWN,
        })
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        one_time: bool,
    ) -> GfxResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
            .vk_context("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }.vk_context("vkEndCommandBuffer")
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .vk_context("vkResetCommandBuffer")
    }

    fn queue_submit(&self, submit: &SubmitDesc) -> GfxResult<()> {
        let command_buffers = [submit.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submit.wait.into_iter().unzip();
        let signal_semaphores: Vec<_> = submit.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], submit.fence)
        }
        .vk_context("vkQueueSubmit")
    }

    fn cmd_image_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(barrier.src_stage)
            .src_access_mask(barrier.src_access)
            .dst_stage_mask(barrier.dst_stage)
            .dst_access_mask(barrier.dst_access)
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: barrier.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        let dependency_info = vk::DependencyInfo::builder()
            .image_memory_barriers(std::slice::from_ref(&image_barrier));

        unsafe {
            match &self.sync2 {
                Some(sync2) => sync2.cmd_pipeline_barrier2(command_buffer, &dependency_info),
                None => self.device.cmd_pipeline_barrier2(command_buffer, &dependency_info),
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
        unsafe { self.device.cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            )
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> GfxResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .vk_context("vkCreateDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> GfxResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .vk_context("vkCreateShaderModule")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> GfxResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device.create_buffer(&create_info, None) }.vk_context("vkCreateBuffer")
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> GfxResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
            .vk_context("vkBindBufferMemory")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn create_image(&self, desc: &ImageDesc) -> GfxResult<vk::Image> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { self.device.create_image(&create_info, None) }.vk_context("vkCreateImage")
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> GfxResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }
            .vk_context("vkBindImageMemory")
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> GfxResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&create_info, None) }
            .vk_context("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        type_index: u32,
    ) -> GfxResult<vk::DeviceMemory> {
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(type_index);
        unsafe { self.device.allocate_memory(&allocate_info, None) }
            .vk_context("vkAllocateMemory")
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(&self, memory: vk::DeviceMemory) -> GfxResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .vk_context("vkMapMemory")?;
        NonNull::new(ptr.cast::<u8>()).ok_or(GfxError::Vulkan {
            call: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn flush_memory(&self, memory: vk::DeviceMemory) -> GfxResult<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }
            .vk_context("vkFlushMappedMemoryRanges")
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        self.destroy();
    }
}

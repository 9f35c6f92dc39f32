// Resource allocator - buffers, images and synchronous uploads
//
// Memory comes straight from vkAllocateMemory, one allocation per resource.
// Host data headed for device-local memory goes through a transient staging
// buffer copied on a one-shot command buffer that is waited on before return.

use ash::vk;

use super::buffer::GpuBuffer;
use super::driver::{GpuDriver, ImageDesc, ImageViewDesc, SubmitDesc};
use super::image::{aspect_for_format, GpuImage, ImageState};
use super::memory::MemoryTypeTable;
use crate::error::{GfxError, GfxResult};

pub struct ResourceAllocator {
    memory_types: MemoryTypeTable,
    command_pool: vk::CommandPool,
}

impl ResourceAllocator {
    pub fn new(memory_types: MemoryTypeTable, command_pool: vk::CommandPool) -> Self {
        Self {
            memory_types,
            command_pool,
        }
    }

    pub fn memory_types(&self) -> &MemoryTypeTable {
        &self.memory_types
    }

    // =========================================================================
    // BUFFERS
    // =========================================================================

    /// Create a buffer bound to the first memory type containing `memory_flags`.
    ///
    /// `src` is copied into the buffer before returning: directly through the
    /// mapping when the memory is host-visible, otherwise through a staging
    /// buffer. Host-visible buffers stay mapped.
    pub fn create_buffer<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        src: Option<&[u8]>,
    ) -> GfxResult<GpuBuffer> {
        if size == 0 {
            return Err(GfxError::InvalidArgument("buffer size must be non-zero".into()));
        }
        if let Some(data) = src {
            if data.len() as vk::DeviceSize > size {
                return Err(GfxError::InvalidArgument(format!(
                    "{} bytes of data do not fit a {} byte buffer",
                    data.len(),
                    size
                )));
            }
        }

        let staged = src.is_some() && !memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let usage = if staged {
            usage | vk::BufferUsageFlags::TRANSFER_DST
        } else {
            usage
        };

        let buffer = driver.create_buffer(size, usage)?;
        let requirements = driver.buffer_memory_requirements(buffer);
        let (memory, chosen_flags) = match self.allocate(driver, &requirements, memory_flags) {
            Ok(allocation) => allocation,
            Err(e) => {
                driver.destroy_buffer(buffer);
                return Err(e);
            }
        };

        let mut gpu_buffer = GpuBuffer {
            buffer,
            memory,
            size,
            memory_flags: chosen_flags,
            mapped: None,
        };

        if let Err(e) = self.finish_buffer(driver, &mut gpu_buffer, src, staged) {
            self.destroy_buffer(driver, gpu_buffer);
            return Err(e);
        }

        log::debug!(
            "Created buffer: {} bytes, usage {:?}, memory {:?}{}",
            size,
            usage,
            chosen_flags,
            if staged { " (staged)" } else { "" }
        );
        Ok(gpu_buffer)
    }

    fn finish_buffer<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        buffer: &mut GpuBuffer,
        src: Option<&[u8]>,
        staged: bool,
    ) -> GfxResult<()> {
        driver.bind_buffer_memory(buffer.buffer, buffer.memory)?;

        if buffer
            .memory_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            buffer.mapped = Some(driver.map_memory(buffer.memory)?);
        }

        match src {
            Some(data) if staged => self.stage_to_buffer(driver, buffer.buffer, data),
            Some(data) => {
                buffer.write(0, data)?;
                driver.flush_memory(buffer.memory)
            }
            None => Ok(()),
        }
    }

    fn stage_to_buffer<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        dst: vk::Buffer,
        data: &[u8],
    ) -> GfxResult<()> {
        let staging = self.create_staging_buffer(driver, data)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as vk::DeviceSize,
        };
        let result = self.one_shot(driver, |cmd| {
            driver.cmd_copy_buffer(cmd, staging.buffer, dst, &[region]);
        });
        self.destroy_buffer(driver, staging);
        result
    }

    /// Host-visible transfer source holding `data`, already flushed.
    pub(crate) fn create_staging_buffer<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        data: &[u8],
    ) -> GfxResult<GpuBuffer> {
        self.create_buffer(
            driver,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            Some(data),
        )
    }

    /// Unmap, destroy and free. The GPU must be done with the buffer.
    pub fn destroy_buffer<D: GpuDriver + ?Sized>(&self, driver: &D, buffer: GpuBuffer) {
        if buffer.mapped.is_some() {
            driver.unmap_memory(buffer.memory);
        }
        driver.destroy_buffer(buffer.buffer);
        driver.free_memory(buffer.memory);
    }

    // =========================================================================
    // IMAGES
    // =========================================================================

    /// Create a single-layer 2D image with a view over all `mip_levels`.
    ///
    /// Device-local images also get TRANSFER_DST so they can be uploaded to.
    /// The tracked state starts out undefined.
    pub fn create_image_2d<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        extent: vk::Extent2D,
        mip_levels: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> GfxResult<GpuImage> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::InvalidArgument(format!(
                "image extent {}x{} is empty",
                extent.width, extent.height
            )));
        }
        let max_mips = super::texture::full_mip_count(extent.width, extent.height);
        if mip_levels == 0 || mip_levels > max_mips {
            return Err(GfxError::InvalidArgument(format!(
                "{} mip levels requested, a {}x{} image has at most {}",
                mip_levels, extent.width, extent.height, max_mips
            )));
        }

        let usage = if memory_flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            usage | vk::ImageUsageFlags::TRANSFER_DST
        } else {
            usage
        };
        let aspect = aspect_for_format(format);

        let image = driver.create_image(&ImageDesc {
            extent,
            format,
            usage,
            mip_levels,
        })?;
        let requirements = driver.image_memory_requirements(image);
        let (memory, _) = match self.allocate(driver, &requirements, memory_flags) {
            Ok(allocation) => allocation,
            Err(e) => {
                driver.destroy_image(image);
                return Err(e);
            }
        };

        let view = driver.bind_image_memory(image, memory).and_then(|_| {
            driver.create_image_view(&ImageViewDesc {
                image,
                format,
                aspect,
                mip_levels,
            })
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                driver.destroy_image(image);
                driver.free_memory(memory);
                return Err(e);
            }
        };

        log::debug!(
            "Created image: {}x{} {:?}, {} mip level(s)",
            extent.width,
            extent.height,
            format,
            mip_levels
        );

        Ok(GpuImage {
            image,
            memory,
            view,
            format,
            extent,
            mip_levels,
            aspect,
            state: ImageState::UNDEFINED,
        })
    }

    /// Destroy view, image and memory. The GPU must be done with the image.
    pub fn destroy_image<D: GpuDriver + ?Sized>(&self, driver: &D, image: GpuImage) {
        driver.destroy_image_view(image.view);
        driver.destroy_image(image.image);
        driver.free_memory(image.memory);
    }

    // =========================================================================
    // ONE-SHOT SUBMISSION
    // =========================================================================

    /// Allocate a primary command buffer and begin recording it for one use.
    pub fn begin_one_shot<D: GpuDriver + ?Sized>(&self, driver: &D) -> GfxResult<vk::CommandBuffer> {
        let cmd = driver.allocate_command_buffer(self.command_pool)?;
        if let Err(e) = driver.begin_command_buffer(cmd, true) {
            driver.free_command_buffer(self.command_pool, cmd);
            return Err(e);
        }
        Ok(cmd)
    }

    /// End, submit and block until `cmd` has executed, then free it.
    pub fn submit_one_shot<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        cmd: vk::CommandBuffer,
    ) -> GfxResult<()> {
        let result = driver.end_command_buffer(cmd).and_then(|_| {
            let fence = driver.create_fence(false)?;
            let submitted = driver
                .queue_submit(&SubmitDesc {
                    command_buffer: cmd,
                    wait: None,
                    signal: None,
                    fence,
                })
                .and_then(|_| driver.wait_fence(fence));
            driver.destroy_fence(fence);
            submitted
        });
        driver.free_command_buffer(self.command_pool, cmd);
        result
    }

    /// Record with `record` and run it synchronously.
    pub fn one_shot<D, F>(&self, driver: &D, record: F) -> GfxResult<()>
    where
        D: GpuDriver + ?Sized,
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.begin_one_shot(driver)?;
        record(cmd);
        self.submit_one_shot(driver, cmd)
    }

    fn allocate<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        requirements: &vk::MemoryRequirements,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> GfxResult<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
        let type_index = self
            .memory_types
            .find(requirements.memory_type_bits, memory_flags)?;
        let memory = driver.allocate_memory(requirements.size, type_index)?;
        let flags = self.memory_types.flags(type_index).unwrap_or(memory_flags);
        Ok((memory, flags))
    }
}

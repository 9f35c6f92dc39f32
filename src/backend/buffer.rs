// GPU buffers for vertex, index, uniform and storage data
//
// A buffer whose memory is host-visible stays mapped for its whole lifetime,
// so per-frame uniform updates are a plain memcpy.

use ash::vk;
use std::ptr::NonNull;

use crate::error::{GfxError, GfxResult};

#[derive(Debug)]
pub struct GpuBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) size: vk::DeviceSize,
    pub(crate) memory_flags: vk::MemoryPropertyFlags,
    pub(crate) mapped: Option<NonNull<u8>>,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Property flags of the memory type the buffer was bound to.
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Persistent mapping, if the memory is host-visible.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        // SAFETY: the mapping covers `size` bytes and lives until the buffer is destroyed.
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) })
    }

    /// Copy `data` into the mapping at byte `offset`.
    ///
    /// Non-coherent memory still needs a flush before the GPU reads it.
    pub fn write<T: bytemuck::Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> GfxResult<()> {
        let ptr = self.mapped.ok_or_else(|| {
            GfxError::InvalidArgument("buffer memory is not host-visible".to_string())
        })?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset
            .checked_add(bytes.len() as vk::DeviceSize)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                GfxError::InvalidArgument(format!(
                    "write of {} bytes at offset {} overruns a {} byte buffer",
                    bytes.len(),
                    offset,
                    self.size
                ))
            })?;
        debug_assert!(end <= self.size);

        unsafe {
            ptr.as_ptr()
                .add(offset as usize)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_buffer(storage: &mut [u8]) -> GpuBuffer {
        GpuBuffer {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: storage.len() as u64,
            memory_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
            mapped: NonNull::new(storage.as_mut_ptr()),
        }
    }

    #[test]
    fn write_lands_at_offset() {
        let mut storage = [0u8; 16];
        let mut buffer = mapped_buffer(&mut storage);
        buffer.write(4, &[1.0f32, 2.0]).unwrap();

        let bytes = buffer.mapped_bytes().unwrap();
        assert_eq!(&bytes[4..8], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &2.0f32.to_ne_bytes());
        assert_eq!(&bytes[..4], &[0; 4]);
    }

    #[test]
    fn write_past_the_end_is_rejected() {
        let mut storage = [0u8; 8];
        let mut buffer = mapped_buffer(&mut storage);
        assert!(buffer.write(4, &[0u32, 0]).is_err());
        assert!(buffer.write(u64::MAX, &[0u8]).is_err());
    }

    #[test]
    fn unmapped_buffer_cannot_be_written() {
        let mut buffer = GpuBuffer {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 64,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            mapped: None,
        };
        assert!(!buffer.is_mapped());
        assert!(buffer.write(0, &[1u8]).is_err());
    }
}

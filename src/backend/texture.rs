// Texture upload
//
// Decoded RGBA8 pixels come in from a loader; the full mip chain is built on
// the CPU and uploaded in one staging copy.

use ash::vk;
use image::imageops::{self, FilterType};
use image::RgbaImage;

use super::allocator::ResourceAllocator;
use super::driver::GpuDriver;
use super::image::{texel_size, GpuImage};
use crate::error::{GfxError, GfxResult};

/// One level of a mip chain, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Number of levels down to 1x1.
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Every level of an RGBA8 image, each one filtered from the previous.
pub fn build_mip_chain_rgba8(width: u32, height: u32, pixels: &[u8]) -> GfxResult<Vec<MipLevel>> {
    let base = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
        GfxError::InvalidArgument(format!(
            "{} bytes is not a {}x{} RGBA8 image",
            pixels.len(),
            width,
            height
        ))
    })?;
    if width == 0 || height == 0 {
        return Err(GfxError::InvalidArgument("texture has no pixels".into()));
    }

    let count = full_mip_count(width, height);
    let mut levels = Vec::with_capacity(count as usize);
    let mut current = base;
    for level in 0..count {
        if level > 0 {
            let w = (current.width() / 2).max(1);
            let h = (current.height() / 2).max(1);
            current = imageops::resize(&current, w, h, FilterType::Triangle);
        }
        levels.push(MipLevel {
            width: current.width(),
            height: current.height(),
            pixels: current.as_raw().clone(),
        });
    }
    Ok(levels)
}

impl ResourceAllocator {
    /// Copy `levels` into `image` and leave it shader-read-only.
    pub fn upload_texture<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        image: &mut GpuImage,
        levels: &[MipLevel],
    ) -> GfxResult<()> {
        let texel = texel_size(image.format()).ok_or_else(|| {
            GfxError::InvalidArgument(format!("cannot upload to {:?} images", image.format()))
        })?;
        if levels.len() as u32 != image.mip_levels() {
            return Err(GfxError::InvalidArgument(format!(
                "{} mip levels supplied for an image with {}",
                levels.len(),
                image.mip_levels()
            )));
        }

        let extent = image.extent();
        let mut packed = Vec::new();
        let mut regions = Vec::with_capacity(levels.len());
        for (mip, level) in levels.iter().enumerate() {
            let width = (extent.width >> mip).max(1);
            let height = (extent.height >> mip).max(1);
            let expected = width as u64 * height as u64 * texel;
            if level.width != width || level.height != height || level.pixels.len() as u64 != expected {
                return Err(GfxError::InvalidArgument(format!(
                    "mip level {} should be {}x{} ({} bytes)",
                    mip, width, height, expected
                )));
            }

            regions.push(vk::BufferImageCopy {
                buffer_offset: packed.len() as vk::DeviceSize,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect(),
                    mip_level: mip as u32,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            });
            packed.extend_from_slice(&level.pixels);
        }

        let staging = self.create_staging_buffer(driver, &packed)?;
        let before = image.state();
        let result = self.one_shot(driver, |cmd| {
            image.transition(
                driver,
                cmd,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags2::TRANSFER_WRITE,
            );
            driver.cmd_copy_buffer_to_image(cmd, staging.handle(), image.handle(), &regions);
            image.transition(
                driver,
                cmd,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags2::SHADER_READ,
            );
        });
        self.destroy_buffer(driver, staging);
        if result.is_err() {
            // The barriers never executed.
            image.state = before;
            return result;
        }

        log::debug!(
            "Uploaded texture {}x{} ({} levels, {} bytes)",
            extent.width,
            extent.height,
            levels.len(),
            packed.len()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_counts() {
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(2, 1), 2);
        assert_eq!(full_mip_count(256, 256), 9);
        assert_eq!(full_mip_count(300, 20), 9);
        assert_eq!(full_mip_count(1024, 768), 11);
    }

    #[test]
    fn chain_halves_down_to_one_texel() {
        let pixels = vec![255u8; 8 * 2 * 4];
        let levels = build_mip_chain_rgba8(8, 2, &pixels).unwrap();
        let sizes: Vec<_> = levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        for level in &levels {
            assert_eq!(level.pixels.len() as u32, level.width * level.height * 4);
        }
    }

    #[test]
    fn solid_colour_survives_filtering() {
        let pixels: Vec<u8> = [10u8, 20, 30, 255].repeat(4 * 4);
        let levels = build_mip_chain_rgba8(4, 4, &pixels).unwrap();
        assert_eq!(levels.last().unwrap().pixels, vec![10, 20, 30, 255]);
    }

    #[test]
    fn wrong_pixel_count_is_rejected() {
        assert!(build_mip_chain_rgba8(4, 4, &[0; 12]).is_err());
        assert!(build_mip_chain_rgba8(0, 0, &[]).is_err());
    }
}

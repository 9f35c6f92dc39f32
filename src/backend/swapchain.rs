// Swapchain - Window presentation
//
// Owns the chain of images we render to and present, plus the last known
// layout of each one. Format and image count are picked once; only the
// extent changes when the swapchain is rebuilt.

use ash::vk;

use super::driver::{GpuDriver, ImageBarrier, ImageViewDesc, SwapchainDesc};
use super::image::{record_transition, ImageRange, ImageState};
use super::surface::PlatformKind;
use crate::error::{GfxError, GfxResult};

/// Formats we render to, in order of preference. Both in SRGB_NONLINEAR space.
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

fn image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
}

/// A presentable image. The image belongs to the swapchain, the view to us.
#[derive(Debug)]
struct SwapchainImage {
    image: vk::Image,
    view: vk::ImageView,
    state: ImageState,
}

pub struct SwapchainManager {
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    surface_format: vk::SurfaceFormatKHR,
    image_count: u32,
    extent: vk::Extent2D,
    current_index: u32,
}

/// First preferred format offered by the surface.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> GfxResult<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&wanted| {
            formats.iter().copied().find(|f| {
                f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .ok_or_else(|| {
            GfxError::unsupported(format!("no acceptable surface format among {:?}", formats))
        })
}

/// `max(platform preference, device minimum)`, capped by the device maximum (0 = no cap).
pub fn choose_image_count(platform: PlatformKind, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = platform.preferred_image_count().max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// The surface's own extent, or the window size clamped to what it allows.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

fn choose_composite_alpha(
    platform: PlatformKind,
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    let preferred = platform.composite_alpha();
    if supported.contains(preferred) || supported.is_empty() {
        preferred
    } else {
        // lowest supported bit
        let bits = supported.as_raw();
        vk::CompositeAlphaFlagsKHR::from_raw(bits & bits.wrapping_neg())
    }
}

impl SwapchainManager {
    /// Placeholder owning nothing, replaced by `create`.
    pub(crate) fn empty() -> Self {
        Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            image_count: 0,
            extent: vk::Extent2D::default(),
            current_index: 0,
        }
    }

    /// Pick the format and image count, then build the first swapchain.
    pub fn create<D: GpuDriver + ?Sized>(driver: &D, width: u32, height: u32) -> GfxResult<Self> {
        let surface_format = choose_surface_format(&driver.surface_formats()?)?;
        let caps = driver.surface_capabilities()?;
        let image_count = choose_image_count(driver.platform(), &caps);

        let mut manager = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            surface_format,
            image_count,
            extent: vk::Extent2D::default(),
            current_index: 0,
        };
        manager.recreate(driver, width, height)?;
        Ok(manager)
    }

    /// Build a new swapchain chained from the current one, then destroy the old one.
    ///
    /// Blocks until the device is idle.
    pub fn recreate<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &D,
        width: u32,
        height: u32,
    ) -> GfxResult<()> {
        if !driver.surface_supports_present()? {
            return Err(GfxError::unsupported(
                "graphics queue family cannot present to the surface",
            ));
        }

        let caps = driver.surface_capabilities()?;
        let present_modes = driver.surface_present_modes()?;
        if !present_modes.contains(&vk::PresentModeKHR::FIFO) {
            return Err(GfxError::unsupported(format!(
                "FIFO present mode not available (have {:?})",
                present_modes
            )));
        }

        let extent = choose_extent(&caps, width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::InvalidArgument(format!(
                "cannot build a {}x{} swapchain",
                extent.width, extent.height
            )));
        }

        driver.wait_idle()?;

        let swapchain = driver.create_swapchain(&SwapchainDesc {
            min_image_count: self.image_count,
            format: self.surface_format,
            extent,
            usage: image_usage(),
            pre_transform: caps.current_transform,
            composite_alpha: choose_composite_alpha(
                driver.platform(),
                caps.supported_composite_alpha,
            ),
            present_mode: vk::PresentModeKHR::FIFO,
            old_swapchain: self.swapchain,
        })?;

        let images = match self.build_images(driver, swapchain) {
            Ok(images) => images,
            Err(e) => {
                driver.destroy_swapchain(swapchain);
                return Err(e);
            }
        };
        if images.len() as u32 != self.image_count {
            log::warn!(
                "Asked for {} swapchain images, got {}",
                self.image_count,
                images.len()
            );
        }

        // New chain is complete; only now retire the old one.
        let old_images = std::mem::replace(&mut self.images, images);
        let old_swapchain = std::mem::replace(&mut self.swapchain, swapchain);
        for image in old_images {
            driver.destroy_image_view(image.view);
        }
        if old_swapchain != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(old_swapchain);
        }

        self.extent = extent;
        self.current_index = 0;

        log::info!(
            "Swapchain {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            self.surface_format.format
        );
        Ok(())
    }

    fn build_images<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        swapchain: vk::SwapchainKHR,
    ) -> GfxResult<Vec<SwapchainImage>> {
        let handles = driver.swapchain_images(swapchain)?;
        let mut images: Vec<SwapchainImage> = Vec::with_capacity(handles.len());
        for image in handles {
            let view = driver.create_image_view(&ImageViewDesc {
                image,
                format: self.surface_format.format,
                aspect: vk::ImageAspectFlags::COLOR,
                mip_levels: 1,
            });
            match view {
                Ok(view) => images.push(SwapchainImage {
                    image,
                    view,
                    state: ImageState::UNDEFINED,
                }),
                Err(e) => {
                    for built in images {
                        driver.destroy_image_view(built.view);
                    }
                    return Err(e);
                }
            }
        }
        Ok(images)
    }

    /// Destroy the views, then the swapchain.
    pub fn destroy<D: GpuDriver + ?Sized>(&mut self, driver: &D) {
        for image in self.images.drain(..) {
            driver.destroy_image_view(image.view);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Record a barrier for the acquired image from its tracked state.
    ///
    /// Both stage masks include COLOR_ATTACHMENT_OUTPUT, the stage the acquire
    /// semaphore is waited on.
    pub fn transition_current_image<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &D,
        command_buffer: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
        new_access: vk::AccessFlags2,
    ) -> GfxResult<ImageBarrier> {
        let index = self.current_index as usize;
        let image = self.images.get_mut(index).ok_or_else(|| {
            GfxError::InvalidArgument(format!("swapchain image {} does not exist", index))
        })?;
        let range = ImageRange {
            image: image.image,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
        };
        Ok(record_transition(
            driver,
            command_buffer,
            range,
            &mut image.state,
            new_layout,
            new_access,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ))
    }

    pub(crate) fn set_current_index(&mut self, index: u32) {
        self.current_index = index;
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images actually in the chain.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Image count passed to the driver on every (re)creation.
    pub fn requested_image_count(&self) -> u32 {
        self.image_count
    }

    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).map(|i| i.image)
    }

    pub fn image_view(&self, index: u32) -> Option<vk::ImageView> {
        self.images.get(index as usize).map(|i| i.view)
    }

    pub fn image_state(&self, index: u32) -> Option<ImageState> {
        self.images.get(index as usize).map(|i| i.state)
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    pub fn current_image(&self) -> vk::Image {
        self.image(self.current_index).unwrap_or_default()
    }

    pub fn current_view(&self) -> vk::ImageView {
        self.image_view(self.current_index).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_over_rgba() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn colour_space_must_match() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );

        let srgb_only = [format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let err = choose_surface_format(&srgb_only).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn image_count_respects_device_limits() {
        assert_eq!(choose_image_count(PlatformKind::Desktop, &caps(2, 8)), 2);
        assert_eq!(choose_image_count(PlatformKind::Desktop, &caps(3, 8)), 3);
        assert_eq!(choose_image_count(PlatformKind::Mobile, &caps(2, 8)), 3);
        assert_eq!(choose_image_count(PlatformKind::Mobile, &caps(1, 2)), 2);
        assert_eq!(choose_image_count(PlatformKind::Mobile, &caps(1, 0)), 3);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut fixed = caps(2, 0);
        fixed.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(
            choose_extent(&fixed, 1920, 1080),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );

        let free = caps(2, 0);
        assert_eq!(
            choose_extent(&free, 8000, 0),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn composite_alpha_falls_back_to_supported_bit() {
        let supported =
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(
            choose_composite_alpha(PlatformKind::Desktop, supported),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(PlatformKind::Mobile, supported),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }
}

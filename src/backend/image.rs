// GPU images and their tracked layout
//
// Every image the core hands out carries the state of the last barrier
// recorded for it. The state is read through `state()` and changed only by
// `transition()`, which records the barrier from the tracked state.

use ash::vk;

use super::driver::{GpuDriver, ImageBarrier};

/// Layout and access of an image as of the last recorded barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageState {
    layout: vk::ImageLayout,
    access: vk::AccessFlags2,
    stage: vk::PipelineStageFlags2,
}

impl ImageState {
    pub const UNDEFINED: ImageState = ImageState {
        layout: vk::ImageLayout::UNDEFINED,
        access: vk::AccessFlags2::NONE,
        stage: vk::PipelineStageFlags2::NONE,
    };

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn access(&self) -> vk::AccessFlags2 {
        self.access
    }

    pub fn stage(&self) -> vk::PipelineStageFlags2 {
        self.stage
    }
}

impl Default for ImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// Pipeline stages that touch an image in `layout`.
pub fn stage_for_layout(layout: vk::ImageLayout) -> vk::PipelineStageFlags2 {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags2::NONE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL | vk::ImageLayout::PRESENT_SRC_KHR => {
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            vk::PipelineStageFlags2::TRANSFER
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
        }
        _ => vk::PipelineStageFlags2::ALL_COMMANDS,
    }
}

/// Depth formats get the depth aspect, combined depth-stencil formats get
/// both, everything else is colour.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Bytes per texel for the uncompressed formats the allocator sizes uploads for.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::X8_D24_UNORM_PACK32 => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// The part of an image a barrier covers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImageRange {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

/// Record a barrier from `state` to `(new_layout, new_access)` and update `state`.
///
/// `extra_stage` is OR-ed into both stage masks.
pub(crate) fn record_transition<D: GpuDriver + ?Sized>(
    driver: &D,
    command_buffer: vk::CommandBuffer,
    range: ImageRange,
    state: &mut ImageState,
    new_layout: vk::ImageLayout,
    new_access: vk::AccessFlags2,
    extra_stage: vk::PipelineStageFlags2,
) -> ImageBarrier {
    let new_stage = stage_for_layout(new_layout) | extra_stage;
    let barrier = ImageBarrier {
        image: range.image,
        aspect: range.aspect,
        mip_levels: range.mip_levels,
        old_layout: state.layout,
        new_layout,
        src_stage: state.stage | extra_stage,
        src_access: state.access,
        dst_stage: new_stage,
        dst_access: new_access,
    };
    driver.cmd_image_barrier(command_buffer, &barrier);

    *state = ImageState {
        layout: new_layout,
        access: new_access,
        stage: stage_for_layout(new_layout),
    };
    barrier
}

/// A device image with its memory, a view over all mip levels and tracked state.
///
/// Destroyed explicitly through the allocator; dropping it leaks.
#[derive(Debug)]
pub struct GpuImage {
    pub(crate) image: vk::Image,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) mip_levels: u32,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) state: ImageState,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Record a barrier to `new_layout`/`new_access` covering every mip level.
    pub fn transition<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &D,
        command_buffer: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
        new_access: vk::AccessFlags2,
    ) -> ImageBarrier {
        let range = self.range();
        record_transition(
            driver,
            command_buffer,
            range,
            &mut self.state,
            new_layout,
            new_access,
            vk::PipelineStageFlags2::NONE,
        )
    }

    pub(crate) fn range(&self) -> ImageRange {
        ImageRange {
            image: self.image,
            aspect: self.aspect,
            mip_levels: self.mip_levels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_get_depth_aspect() {
        for format in [vk::Format::D16_UNORM, vk::Format::D32_SFLOAT] {
            assert_eq!(aspect_for_format(format), vk::ImageAspectFlags::DEPTH);
        }
        for format in [
            vk::Format::D16_UNORM_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT_S8_UINT,
        ] {
            assert_eq!(
                aspect_for_format(format),
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            );
        }
        assert_eq!(
            aspect_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_for_format(vk::Format::R32_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn layout_stages() {
        assert_eq!(
            stage_for_layout(vk::ImageLayout::UNDEFINED),
            vk::PipelineStageFlags2::NONE
        );
        assert_eq!(
            stage_for_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::PipelineStageFlags2::TRANSFER
        );
        assert_eq!(
            stage_for_layout(vk::ImageLayout::GENERAL),
            vk::PipelineStageFlags2::ALL_COMMANDS
        );
        assert!(stage_for_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn fresh_state_is_undefined() {
        let state = ImageState::default();
        assert_eq!(state.layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(state.access(), vk::AccessFlags2::NONE);
        assert_eq!(state.stage(), vk::PipelineStageFlags2::NONE);
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }
}

// Error types for the graphics device
//
// Every failure carries an ErrorKind so callers can tell an impossible
// configuration (fatal) from an out-of-date swapchain (retry next frame).

use ash::vk;
use thiserror::Error;

pub type GfxResult<T> = Result<T, GfxError>;

/// Broad classification of a [`GfxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The machine cannot satisfy what was asked for. Fatal.
    Configuration,
    /// A Vulkan call failed at runtime (OOM, device lost, ...). Fatal.
    Device,
    /// The caller broke an API contract.
    Usage,
    /// Expected and recoverable; retry after the swapchain is rebuilt.
    Transient,
}

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(String),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("no memory type matches type bits {type_bits:#b} with properties {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("out of memory ({0:?})")]
    OutOfMemory(vk::Result),

    #[error("GPU device lost")]
    DeviceLost,

    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("a frame submission failed; the frame ring can no longer be used")]
    FrameRingLost,

    #[error("no frame is being recorded")]
    NoFrameInProgress,

    #[error("invalid SPIR-V: {0}")]
    InvalidShader(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl GfxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Loading(_) | Self::Unsupported(_) | Self::NoMemoryType { .. } => {
                ErrorKind::Configuration
            }
            Self::OutOfMemory(_) | Self::DeviceLost | Self::Vulkan { .. } | Self::FrameRingLost => {
                ErrorKind::Device
            }
            Self::NoFrameInProgress | Self::InvalidShader(_) | Self::InvalidArgument(_) => {
                ErrorKind::Usage
            }
            Self::SwapchainOutOfDate => ErrorKind::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

/// Attach the failing entry point to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_context(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|result| match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => GfxError::SwapchainOutOfDate,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                GfxError::OutOfMemory(result)
            }
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            _ => GfxError::Vulkan { call, result },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_the_only_transient_error() {
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DATE_KHR).vk_context("vkAcquireNextImageKHR");
        let err = err.unwrap_err();
        assert!(err.is_transient());

        assert_eq!(GfxError::unsupported("no FIFO").kind(), ErrorKind::Configuration);
        assert_eq!(GfxError::DeviceLost.kind(), ErrorKind::Device);
        assert_eq!(GfxError::FrameRingLost.kind(), ErrorKind::Device);
        assert_eq!(GfxError::NoFrameInProgress.kind(), ErrorKind::Usage);
    }

    #[test]
    fn vk_results_map_to_dedicated_variants() {
        let oom = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).vk_context("vkAllocateMemory");
        assert!(matches!(oom, Err(GfxError::OutOfMemory(_))));

        let other = Err::<(), _>(vk::Result::ERROR_INITIALIZATION_FAILED).vk_context("vkCreateDevice");
        match other {
            Err(GfxError::Vulkan { call, result }) => {
                assert_eq!(call, "vkCreateDevice");
                assert_eq!(result, vk::Result::ERROR_INITIALIZATION_FAILED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn display_names_the_failing_call() {
        let err = GfxError::Vulkan {
            call: "vkQueueSubmit",
            result: vk::Result::ERROR_UNKNOWN,
        };
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }
}

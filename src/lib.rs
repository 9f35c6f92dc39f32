// gfx-device - shared Vulkan device substrate
//
// Owns the device, swapchain, frame pacing and resource creation that the
// triangle, compute, tessellation and model demos build on.

pub mod backend;
pub mod config;
pub mod error;

pub use backend::{FrameInfo, FrameStatus, GfxDevice, GpuDriver, PresentStatus};
pub use config::Config;
pub use error::{ErrorKind, GfxError, GfxResult};

// Re-exported so callers record commands against the same ash version.
pub use ash;

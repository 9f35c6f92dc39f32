// Backend module - Vulkan device substrate
//
// Design: everything above `driver` is generic over GpuDriver, so the same
// swapchain, frame and resource code runs on ash or on the dummy driver.

pub mod allocator;
pub mod buffer;
pub mod debug;
pub mod device;
pub mod driver;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod image;
pub mod memory;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vulkan;

pub use allocator::ResourceAllocator;
pub use buffer::GpuBuffer;
pub use device::{DeviceCapabilities, GfxDevice};
pub use driver::GpuDriver;
#[cfg(feature = "dummy")]
pub use dummy::{DummyConfig, DummyDriver};
pub use image::{GpuImage, ImageState};
pub use memory::MemoryTypeTable;
pub use shader::{DirectoryShaderSource, ShaderSource};
pub use surface::{DesktopSurface, MobileSurface, PlatformKind, PlatformSurface};
pub use swapchain::SwapchainManager;
pub use sync::{FrameInfo, FrameScheduler, FrameStatus, PresentStatus, IN_FLIGHT_FRAMES};
pub use texture::{build_mip_chain_rgba8, full_mip_count, MipLevel};
pub use vulkan::VulkanDriver;

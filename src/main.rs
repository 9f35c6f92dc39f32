// =============================================================================
// GFX-DEVICE DEMO - clears the swapchain through the shared device context
// =============================================================================
//
// FRAME FLOW:
// 1. Recreate the swapchain if the window size changed
// 2. new_frame: wait for the slot's fence, acquire an image, begin recording
// 3. Clear the image (dynamic rendering on 1.3, transfer clear otherwise)
// 4. Transition to PRESENT_SRC
// 5. submit: end, queue submit, present
//
// =============================================================================

use anyhow::{Context, Result};
use gfx_device::ash::vk;
use gfx_device::backend::{DesktopSurface, GfxDevice, VulkanDriver};
use gfx_device::{Config, FrameStatus, PresentStatus};
use glam::Vec4;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config);
    log::info!(
        "Starting {} at {}x{}{}",
        config.window.title,
        config.window.width,
        config.window.height,
        if config.window.fullscreen { " (fullscreen)" } else { "" }
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop
        .run_app(&mut App::new(config))
        .context("Event loop terminated abnormally")
}

/// RUST_LOG wins over the configured filter.
fn init_logging(settings: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.parse_filters(&settings.debug.log_filter);
    }
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Dropped before the window it presents to
    device: Option<GfxDevice<VulkanDriver>>,
    window: Option<Arc<Window>>,

    is_minimized: bool,

    started: Instant,
    last_fps_update: Instant,
    frame_count: u32,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            device: None,
            window: None,
            is_minimized: false,
            started: now,
            last_fps_update: now,
            frame_count: 0,
        }
    }

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        let surface = DesktopSurface::from_window(window).context("Unsupported window system")?;
        // SAFETY: the window is owned by App and outlives the device.
        let driver = unsafe { VulkanDriver::open(&self.config.window.title, &self.config.debug, &surface) }
            .context("Failed to bring up Vulkan")?;

        let size = window.inner_size();
        let device = GfxDevice::initialize(driver, &self.config.graphics, size.width, size.height)
            .context("Failed to initialize graphics device")?;
        device.set_object_name(device.command_pool(), "frame command pool");
        device.set_object_name(device.descriptor_pool(), "global descriptor pool");

        log::info!(
            "Vulkan initialized: {} swapchain images at {}x{}",
            device.swapchain_image_count(),
            device.swapchain_resolution().width,
            device.swapchain_resolution().height
        );
        self.device = Some(device);
        Ok(())
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Returns whether a frame was presented.
    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        let (Some(device), Some(window)) = (self.device.as_mut(), self.window.as_ref()) else {
            return Ok(false);
        };

        let size = window.inner_size();
        device
            .handle_surface_resize(size.width, size.height)
            .context("Failed to recreate swapchain")?;

        let frame = match device.new_frame()? {
            FrameStatus::Ready(frame) => frame,
            FrameStatus::Skipped => return Ok(false),
        };
        let cmd = frame.command_buffer;

        let t = self.started.elapsed().as_secs_f32().sin() * 0.5 + 0.5;
        let color = Vec4::from_array(self.config.graphics.clear_color)
            .lerp(Vec4::from_array(self.config.graphics.secondary_clear_color), t)
            .to_array();

        if device.is_support_vulkan13() {
            clear_dynamic_rendering(device, cmd, color)?;
        } else {
            clear_transfer(device, cmd, color)?;
        }

        device.transition_swapchain_image(
            cmd,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags2::NONE,
        )?;

        match device.submit()? {
            PresentStatus::Presented => {}
            PresentStatus::Suboptimal | PresentStatus::OutOfDate => {
                if size.width > 0 && size.height > 0 {
                    device.recreate_swapchain(size.width, size.height)?;
                }
            }
        }

        Ok(true)
    }

    /// Borderless fullscreen on the current monitor, or back to windowed.
    fn toggle_fullscreen(&self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let fullscreen = window.fullscreen().is_none();
        window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Fullscreen {}", if fullscreen { "on" } else { "off" });
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        if let Some(window) = &self.window {
            window.set_title(&format!(
                "{} - {:.0} FPS",
                self.config.window.title,
                self.frame_count as f32 / elapsed
            ));
        }
        self.frame_count = 0;
        self.last_fps_update = now;
    }

    fn shutdown(&mut self) {
        if let Some(device) = self.device.take() {
            if let Err(e) = device.wait_for_idle() {
                log::error!("wait_for_idle failed: {}", e);
            }
            device.shutdown();
        }
    }
}

fn clear_dynamic_rendering(
    device: &mut GfxDevice<VulkanDriver>,
    cmd: vk::CommandBuffer,
    color: [f32; 4],
) -> Result<()> {
    device.transition_swapchain_image(
        cmd,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    )?;

    let color_attachment = vk::RenderingAttachmentInfo::builder()
        .image_view(device.current_swapchain_image_view())
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        })
        .build();
    let rendering_info = vk::RenderingInfo::builder()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: device.swapchain_resolution(),
        })
        .layer_count(1)
        .color_attachments(std::slice::from_ref(&color_attachment));

    let raw = device.driver().raw();
    unsafe {
        raw.cmd_begin_rendering(cmd, &rendering_info);
        raw.cmd_end_rendering(cmd);
    }
    Ok(())
}

fn clear_transfer(
    device: &mut GfxDevice<VulkanDriver>,
    cmd: vk::CommandBuffer,
    color: [f32; 4],
) -> Result<()> {
    device.transition_swapchain_image(
        cmd,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::AccessFlags2::TRANSFER_WRITE,
    )?;

    let range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    unsafe {
        device.driver().raw().cmd_clear_color_image(
            cmd,
            device.current_swapchain_image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &vk::ClearColorValue { float32: color },
            &[range],
        );
    }
    Ok(())
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let settings = &self.config.window;
        let attributes = Window::default_attributes()
            .with_title(settings.title.as_str())
            .with_inner_size(PhysicalSize::new(settings.width, settings.height))
            .with_fullscreen(settings.fullscreen.then_some(Fullscreen::Borderless(None)));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Window creation failed: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(()) => self.window = Some(window),
            Err(e) => {
                log::error!("Graphics initialization failed: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Window closed");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::trace!("Resized to {:?}", size);
                self.is_minimized = size.width == 0 || size.height == 0;
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Frame failed: {:#}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("Escape pressed, exiting");
                        self.shutdown();
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }

    /// Continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}

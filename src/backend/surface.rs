// Platform surfaces
//
// The window collaborator hands us raw handles; this module turns them into
// a VkSurfaceKHR. Desktop and mobile differ in a few presentation defaults,
// which are exposed through PlatformKind instead of #[cfg] branches in the
// device core.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::ffi::{c_void, CStr};

use crate::error::{GfxError, GfxResult, VkResultExt};

/// Which family of platform the surface lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Desktop,
    Mobile,
}

impl PlatformKind {
    /// Swapchain image count we ask for before clamping to device limits.
    ///
    /// Mobile compositors add a frame of latency on some devices, so a third
    /// image keeps the queue from stalling.
    pub fn preferred_image_count(self) -> u32 {
        match self {
            PlatformKind::Desktop => 2,
            PlatformKind::Mobile => 3,
        }
    }

    pub fn composite_alpha(self) -> vk::CompositeAlphaFlagsKHR {
        match self {
            PlatformKind::Desktop => vk::CompositeAlphaFlagsKHR::OPAQUE,
            PlatformKind::Mobile => vk::CompositeAlphaFlagsKHR::INHERIT,
        }
    }

    /// Validation layers are never enabled on mobile.
    pub fn allows_validation(self) -> bool {
        matches!(self, PlatformKind::Desktop)
    }
}

/// A native window the device can present to.
pub trait PlatformSurface {
    fn kind(&self) -> PlatformKind;

    /// Instance extensions needed to create the surface.
    fn required_extensions(&self) -> GfxResult<Vec<&'static CStr>>;

    /// Create the Vulkan surface.
    ///
    /// # Safety
    /// The native window behind the handles must outlive the returned surface.
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> GfxResult<vk::SurfaceKHR>;
}

// =============================================================================
// DESKTOP
// =============================================================================

/// Win32, Wayland, Xlib or Xcb window.
#[derive(Debug, Clone, Copy)]
pub struct DesktopSurface {
    display: RawDisplayHandle,
    window: RawWindowHandle,
}

impl DesktopSurface {
    pub fn from_window<W: HasWindowHandle + HasDisplayHandle>(window: &W) -> GfxResult<Self> {
        let display = window
            .display_handle()
            .map_err(|e| GfxError::unsupported(format!("no display handle: {}", e)))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| GfxError::unsupported(format!("no window handle: {}", e)))?
            .as_raw();
        Self::from_raw(display, window)
    }

    pub fn from_raw(display: RawDisplayHandle, window: RawWindowHandle) -> GfxResult<Self> {
        match window {
            RawWindowHandle::Win32(_)
            | RawWindowHandle::Wayland(_)
            | RawWindowHandle::Xlib(_)
            | RawWindowHandle::Xcb(_) => Ok(Self { display, window }),
            other => Err(GfxError::unsupported(format!(
                "window handle {:?} is not a desktop window",
                other
            ))),
        }
    }
}

impl PlatformSurface for DesktopSurface {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Desktop
    }

    fn required_extensions(&self) -> GfxResult<Vec<&'static CStr>> {
        let platform = match self.window {
            RawWindowHandle::Win32(_) => khr::Win32Surface::name(),
            RawWindowHandle::Wayland(_) => khr::WaylandSurface::name(),
            RawWindowHandle::Xlib(_) => khr::XlibSurface::name(),
            RawWindowHandle::Xcb(_) => khr::XcbSurface::name(),
            other => {
                return Err(GfxError::unsupported(format!(
                    "unsupported window handle {:?}",
                    other
                )))
            }
        };
        Ok(vec![khr::Surface::name(), platform])
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> GfxResult<vk::SurfaceKHR> {
        match (self.display, self.window) {
            (_, RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
                let hwnd = handle.hwnd.get() as *const c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                khr::Win32Surface::new(entry, instance)
                    .create_win32_surface(&create_info, None)
                    .vk_context("vkCreateWin32SurfaceKHR")
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr() as *mut _)
                    .surface(window.surface.as_ptr() as *mut _);
                khr::WaylandSurface::new(entry, instance)
                    .create_wayland_surface(&create_info, None)
                    .vk_context("vkCreateWaylandSurfaceKHR")
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
                let dpy = display
                    .display
                    .ok_or_else(|| GfxError::unsupported("Xlib display handle is null"))?;
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy.as_ptr() as *mut _)
                    .window(window.window as vk::Window);
                khr::XlibSurface::new(entry, instance)
                    .create_xlib_surface(&create_info, None)
                    .vk_context("vkCreateXlibSurfaceKHR")
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
                let connection = display
                    .connection
                    .ok_or_else(|| GfxError::unsupported("Xcb connection is null"))?;
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection.as_ptr() as *mut _)
                    .window(window.window.get());
                khr::XcbSurface::new(entry, instance)
                    .create_xcb_surface(&create_info, None)
                    .vk_context("vkCreateXcbSurfaceKHR")
            }
            (display, window) => Err(GfxError::unsupported(format!(
                "mismatched display/window handles: {:?} / {:?}",
                display, window
            ))),
        }
    }
}

// =============================================================================
// MOBILE
// =============================================================================

/// Android `ANativeWindow`.
#[derive(Debug, Clone, Copy)]
pub struct MobileSurface {
    window: RawWindowHandle,
}

impl MobileSurface {
    pub fn from_raw(window: RawWindowHandle) -> GfxResult<Self> {
        match window {
            RawWindowHandle::AndroidNdk(_) => Ok(Self { window }),
            other => Err(GfxError::unsupported(format!(
                "window handle {:?} is not an Android window",
                other
            ))),
        }
    }
}

impl PlatformSurface for MobileSurface {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Mobile
    }

    fn required_extensions(&self) -> GfxResult<Vec<&'static CStr>> {
        Ok(vec![khr::Surface::name(), khr::AndroidSurface::name()])
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> GfxResult<vk::SurfaceKHR> {
        let RawWindowHandle::AndroidNdk(handle) = self.window else {
            return Err(GfxError::unsupported("not an Android window"));
        };
        let create_info = vk::AndroidSurfaceCreateInfoKHR::builder()
            .window(handle.a_native_window.as_ptr() as *mut _);
        khr::AndroidSurface::new(entry, instance)
            .create_android_surface(&create_info, None)
            .vk_context("vkCreateAndroidSurfaceKHR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        AndroidNdkWindowHandle, WaylandDisplayHandle, WaylandWindowHandle, WebWindowHandle,
    };
    use std::ptr::NonNull;

    fn dangling() -> NonNull<c_void> {
        NonNull::dangling()
    }

    #[test]
    fn platform_defaults() {
        assert_eq!(PlatformKind::Desktop.preferred_image_count(), 2);
        assert_eq!(PlatformKind::Mobile.preferred_image_count(), 3);
        assert!(PlatformKind::Desktop.allows_validation());
        assert!(!PlatformKind::Mobile.allows_validation());
        assert_eq!(
            PlatformKind::Mobile.composite_alpha(),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn wayland_window_needs_wayland_surface_extension() {
        let surface = DesktopSurface::from_raw(
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(dangling())),
            RawWindowHandle::Wayland(WaylandWindowHandle::new(dangling())),
        )
        .unwrap();
        assert_eq!(surface.kind(), PlatformKind::Desktop);
        assert_eq!(
            surface.required_extensions().unwrap(),
            vec![khr::Surface::name(), khr::WaylandSurface::name()]
        );
    }

    #[test]
    fn android_window_is_mobile() {
        let surface =
            MobileSurface::from_raw(RawWindowHandle::AndroidNdk(AndroidNdkWindowHandle::new(dangling())))
                .unwrap();
        assert_eq!(surface.kind(), PlatformKind::Mobile);
        assert!(surface
            .required_extensions()
            .unwrap()
            .contains(&khr::AndroidSurface::name()));
    }

    #[test]
    fn web_handles_are_rejected() {
        let err = MobileSurface::from_raw(RawWindowHandle::Web(WebWindowHandle::new(1))).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}

// Surface - window connection
//
// Turns the host window's raw handles into a VkSurfaceKHR and tells the
// instance which surface extensions that needs. Win32, Xlib and Wayland.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

use super::error::RendererError;
use super::instance::Instance;

/// Instance extensions required to present to windows of this display.
pub fn required_instance_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        _ => return Err(RendererError::UnsupportedPlatform.into()),
    };

    Ok(vec![khr::Surface::name(), platform])
}

/// Create a presentable surface for the window.
///
/// The surface must be destroyed (`Instance::destroy_surface`) before the
/// instance goes away.
pub fn create_surface(
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = unsafe {
        match (display, window) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0)
                    as *const std::ffi::c_void;
                let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                khr::Win32Surface::new(&instance.entry, &instance.instance)
                    .create_win32_surface(&create_info, None)
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display
                    .display
                    .map_or(std::ptr::null_mut(), |ptr| ptr.as_ptr())
                    as *mut vk::Display;
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy)
                    .window(handle.window);
                khr::XlibSurface::new(&instance.entry, &instance.instance)
                    .create_xlib_surface(&create_info, None)
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr())
                    .surface(handle.surface.as_ptr());
                khr::WaylandSurface::new(&instance.entry, &instance.instance)
                    .create_wayland_surface(&create_info, None)
            }
            _ => return Err(RendererError::UnsupportedPlatform.into()),
        }
    }
    .context("Failed to create window surface")?;

    log::info!("Created window surface");

    Ok(surface)
}

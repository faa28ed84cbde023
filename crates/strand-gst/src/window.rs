//! Native window surfaces
//!
//! Bridges `raw-window-handle` windows to the core's [`SurfaceProvider`].

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use std::sync::Mutex;
use strand_core::{RenderRect, SurfaceProvider};

/// Numeric handle GStreamer's overlay interface expects for `handle`
pub fn native_handle_of(handle: RawWindowHandle) -> Option<u64> {
    match handle {
        RawWindowHandle::Xlib(h) => Some(h.window as u64),
        RawWindowHandle::Xcb(h) => Some(h.window.get() as u64),
        RawWindowHandle::Wayland(h) => Some(h.surface.as_ptr() as usize as u64),
        RawWindowHandle::Win32(h) => Some(h.hwnd.get() as u64),
        RawWindowHandle::AppKit(h) => Some(h.ns_view.as_ptr() as usize as u64),
        _ => None,
    }
}

/// Window surface whose handle and video rectangle the host updates
#[derive(Debug)]
pub struct WindowSurface {
    handle: Mutex<Option<u64>>,
    rect: Mutex<RenderRect>,
}

impl WindowSurface {
    pub fn new(handle: Option<u64>, rect: RenderRect) -> Self {
        Self {
            handle: Mutex::new(handle),
            rect: Mutex::new(rect),
        }
    }

    /// Capture the native handle of a live window
    pub fn from_window(window: &impl HasWindowHandle, rect: RenderRect) -> Self {
        let handle = window
            .window_handle()
            .ok()
            .and_then(|h| native_handle_of(h.as_raw()));
        Self::new(handle, rect)
    }

    pub fn set_handle(&self, handle: Option<u64>) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    pub fn set_rect(&self, rect: RenderRect) {
        *self.rect.lock().unwrap_or_else(|e| e.into_inner()) = rect;
    }
}

impl SurfaceProvider for WindowSurface {
    fn native_handle(&self) -> Option<u64> {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn render_rect(&self) -> RenderRect {
        *self.rect.lock().unwrap_or_else(|e| e.into_inner())
    }
}

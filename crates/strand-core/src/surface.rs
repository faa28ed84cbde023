//! Render-surface preparation
//!
//! The video sink asks for a native window handle from its own streaming
//! thread and expects an answer before it renders the first frame. The
//! binder resolves the handle from the window system and rejects values
//! that cannot be a real window.

use crate::{types::RenderRect, Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles below this value are treated as unset
pub const MIN_SURFACE_HANDLE: u64 = 0x10;

/// Window-system collaborator supplying the render surface
pub trait SurfaceProvider: Send + Sync {
    /// Native handle of the video area, if one exists yet
    fn native_handle(&self) -> Option<u64>;

    /// Current render rectangle within the surface
    fn render_rect(&self) -> RenderRect;
}

/// Handle and rectangle the engine applies to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceAssignment {
    pub handle: u64,
    pub rect: RenderRect,
}

/// Resolves surface assignments for the video sink
#[derive(Clone)]
pub struct SurfaceBinder {
    provider: Arc<dyn SurfaceProvider>,
}

impl SurfaceBinder {
    pub fn new(provider: Arc<dyn SurfaceProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the assignment for one preparation notification
    pub fn prepare(&self) -> Result<SurfaceAssignment> {
        let handle = self.provider.native_handle();
        match handle {
            Some(handle) if handle >= MIN_SURFACE_HANDLE => {
                let rect = self.provider.render_rect();
                debug!(handle, ?rect, "Surface prepared");
                Ok(SurfaceAssignment { handle, rect })
            }
            _ => Err(Error::InvalidSurfaceHandle(handle)),
        }
    }

    /// Same as [`prepare`](Self::prepare), logging and skipping failures.
    /// The sink asks again on its next notification.
    pub fn prepare_or_skip(&self) -> Option<SurfaceAssignment> {
        match self.prepare() {
            Ok(assignment) => Some(assignment),
            Err(e) => {
                warn!(error = %e, "Skipping surface preparation");
                None
            }
        }
    }

    pub fn render_rect(&self) -> RenderRect {
        self.provider.render_rect()
    }
}

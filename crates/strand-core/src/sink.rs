//! Video sink selection
//!
//! Each windowing platform has a preferred native sink. The choice is a
//! lookup keyed by the detected platform, with an explicit override tried
//! first and `autovideosink` as the last resort.

use crate::{engine::Engine, types::*, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Generic fallback sink
pub const FALLBACK_VIDEO_SINK: &str = "autovideosink";

/// Windowing platform the player runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Wayland,
    X11,
    Windows,
    MacOs,
    Other,
}

impl Platform {
    /// Detect from the process environment
    pub fn detect() -> Self {
        Self::detect_from(
            std::env::consts::OS,
            |key| std::env::var_os(key).is_some_and(|v| !v.is_empty()),
        )
    }

    /// Detect from an OS name and an environment probe
    pub fn detect_from(os: &str, has_env: impl Fn(&str) -> bool) -> Self {
        match os {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ if has_env("WAYLAND_DISPLAY") => Platform::Wayland,
            _ if has_env("DISPLAY") => Platform::X11,
            _ => Platform::Other,
        }
    }

    /// Native sink factories, most preferred first
    pub fn preferred_sinks(&self) -> &'static [&'static str] {
        match self {
            Platform::Wayland => &["waylandsink"],
            Platform::X11 => &["ximagesink", "xvimagesink"],
            Platform::Windows => &["d3d11videosink", "d3dvideosink"],
            Platform::MacOs => &["osxvideosink", "glimagesink"],
            Platform::Other => &[],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Wayland => "Wayland",
            Platform::X11 => "X11",
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Other => "Other",
        }
    }
}

/// Ordered list of video sink factories to try
#[derive(Debug, Clone)]
pub struct SinkSelector {
    platform: Platform,
    override_sink: Option<String>,
}

impl SinkSelector {
    pub fn new(platform: Platform, override_sink: Option<String>) -> Self {
        Self {
            platform,
            override_sink,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Candidates in the order they are tried, without duplicates
    pub fn candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let table = self.platform.preferred_sinks().iter().map(|s| s.to_string());
        for factory in self
            .override_sink
            .iter()
            .cloned()
            .chain(table)
            .chain(std::iter::once(FALLBACK_VIDEO_SINK.to_string()))
        {
            if !candidates.contains(&factory) {
                candidates.push(factory);
            }
        }
        candidates
    }

    /// Build the first candidate the engine can construct
    pub fn create(&self, engine: &dyn Engine, name: &str) -> Result<(StageId, String)> {
        for factory in self.candidates() {
            match engine.create_stage(StageKind::Sink, &factory, name) {
                Some(id) => {
                    info!(factory = %factory, platform = self.platform.display_name(), "Video sink selected");
                    return Ok((id, factory));
                }
                None => {
                    if self.override_sink.as_deref() == Some(factory.as_str()) {
                        warn!(factory = %factory, "Video sink override unavailable");
                    } else {
                        debug!(factory = %factory, "Video sink unavailable");
                    }
                }
            }
        }
        Err(Error::ElementCreation {
            factory: FALLBACK_VIDEO_SINK.to_string(),
            name: name.to_string(),
        })
    }
}

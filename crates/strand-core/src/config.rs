//! Player configuration

use crate::{types::Resolution, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable naming a video sink factory to try first
pub const VIDEO_SINK_ENV: &str = "GST_VIDEOSINK";

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Video sink factory override, tried before the platform table
    pub video_sink: Option<String>,
    /// Decryptor factory; `None` means protected streams go direct
    pub decryptor: Option<String>,
    /// Constraint applied by the reduced quality tier
    pub reduced_resolution: Resolution,
    /// Position/duration poll period in milliseconds
    pub position_poll_interval_ms: u64,
    /// Telemetry broadcast buffer
    pub telemetry_capacity: usize,
    /// Control command queue depth
    pub command_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_sink: None,
            decryptor: None,
            reduced_resolution: Resolution::REDUCED,
            position_poll_interval_ms: 200,
            telemetry_capacity: 256,
            command_capacity: 32,
        }
    }
}

impl PlayerConfig {
    /// Defaults plus the `GST_VIDEOSINK` override
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides in place
    pub fn apply_env(&mut self) {
        if let Ok(sink) = std::env::var(VIDEO_SINK_ENV) {
            let sink = sink.trim();
            if !sink.is_empty() {
                debug!(sink, "Video sink override from environment");
                self.video_sink = Some(sink.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.position_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("position_poll_interval_ms must be > 0".into()));
        }
        if self.telemetry_capacity == 0 || self.command_capacity == 0 {
            return Err(Error::InvalidConfig("channel capacities must be > 0".into()));
        }
        if self.reduced_resolution.width == 0 || self.reduced_resolution.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "reduced_resolution {} has a zero dimension",
                self.reduced_resolution
            )));
        }
        Ok(())
    }
}

/// Media to play. Paths are opaque: a separate provisioning step may have
/// produced a decrypted copy before playback starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub location: String,
    pub decrypted_location: Option<String>,
}

impl MediaSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            decrypted_location: None,
        }
    }

    pub fn with_decrypted(mut self, location: impl Into<String>) -> Self {
        self.decrypted_location = Some(location.into());
        self
    }

    /// Location handed to the source stage
    pub fn effective_location(&self) -> &str {
        self.decrypted_location.as_deref().unwrap_or(&self.location)
    }
}

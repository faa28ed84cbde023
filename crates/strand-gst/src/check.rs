//! Installation check
//!
//! Reports whether every element factory the pipeline graph needs is
//! registered, and which native video sinks this platform can use.

use crate::engine::init_gstreamer;
use anyhow::{Context, Result};
use gstreamer as gst;
use strand_core::sink::{Platform, FALLBACK_VIDEO_SINK};

/// Factories the graph cannot be built without
pub const REQUIRED_ELEMENTS: &[(&str, &str)] = &[
    ("filesrc", "File source"),
    ("decodebin", "Auto demuxing and decoding"),
    ("queue", "Branch queues"),
    ("videoconvert", "Video conversion"),
    ("videoscale", "Video scaling"),
    ("capsfilter", "Quality tier constraint"),
    ("audioconvert", "Audio conversion"),
    ("audioresample", "Audio resampling"),
    ("autoaudiosink", "Audio output"),
    (FALLBACK_VIDEO_SINK, "Fallback video output"),
];

/// Check GStreamer installation and capabilities
pub fn check_gstreamer_installation() -> Result<GStreamerInfo> {
    init_gstreamer().context("Failed to initialize GStreamer")?;

    let (major, minor, micro, nano) = gst::version();
    let version = format!("{}.{}.{}.{}", major, minor, micro, nano);

    let mut missing = Vec::new();
    for (element, desc) in REQUIRED_ELEMENTS {
        if gst::ElementFactory::find(element).is_none() {
            missing.push(format!("{} ({})", element, desc));
        }
    }

    let platform = Platform::detect();
    let video_sinks = platform
        .preferred_sinks()
        .iter()
        .filter(|sink| gst::ElementFactory::find(sink).is_some())
        .map(|sink| sink.to_string())
        .collect();

    Ok(GStreamerInfo {
        version,
        missing_elements: missing,
        platform,
        video_sinks,
    })
}

/// GStreamer installation information
#[derive(Debug)]
pub struct GStreamerInfo {
    pub version: String,
    pub missing_elements: Vec<String>,
    pub platform: Platform,
    /// Native sinks available for this platform, most preferred first
    pub video_sinks: Vec<String>,
}

impl GStreamerInfo {
    pub fn is_complete(&self) -> bool {
        self.missing_elements.is_empty()
    }

    pub fn has_native_sink(&self) -> bool {
        !self.video_sinks.is_empty()
    }
}

//! Core types for Strand

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Graph Types
// =============================================================================

/// Engine-issued handle for a stage. Only meaningful to the engine that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub u32);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Role a stage plays in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Source,
    Demultiplexer,
    Queue,
    Converter,
    Resampler,
    Scaler,
    ConstraintFilter,
    Decryptor,
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Source => write!(f, "source"),
            StageKind::Demultiplexer => write!(f, "demuxer"),
            StageKind::Queue => write!(f, "queue"),
            StageKind::Converter => write!(f, "converter"),
            StageKind::Resampler => write!(f, "resampler"),
            StageKind::Scaler => write!(f, "scaler"),
            StageKind::ConstraintFilter => write!(f, "capsfilter"),
            StageKind::Decryptor => write!(f, "decryptor"),
            StageKind::Sink => write!(f, "sink"),
        }
    }
}

/// Data-flow direction of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointDirection {
    Output,
    Input,
}

/// A named output or input of a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub stage: StageId,
    /// Stage name, kept for log output
    pub stage_name: String,
    pub pad: String,
    pub direction: EndpointDirection,
}

impl Endpoint {
    pub fn output(stage: StageId, stage_name: impl Into<String>, pad: impl Into<String>) -> Self {
        Self {
            stage,
            stage_name: stage_name.into(),
            pad: pad.into(),
            direction: EndpointDirection::Output,
        }
    }

    pub fn input(stage: StageId, stage_name: impl Into<String>, pad: impl Into<String>) -> Self {
        Self {
            stage,
            stage_name: stage_name.into(),
            pad: pad.into(),
            direction: EndpointDirection::Input,
        }
    }

    pub fn is_output(&self) -> bool {
        self.direction == EndpointDirection::Output
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage_name, self.pad)
    }
}

/// Link status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Unlinked,
    Linked,
}

/// Directed edge between an output and an input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub output: Endpoint,
    pub input: Endpoint,
    pub status: LinkStatus,
}

/// Result of a single link attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link was established
    Linked,
    /// The input already had a link; nothing changed
    AlreadyLinked,
    /// The engine refused the link
    Failed(String),
}

impl LinkOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, LinkOutcome::Failed(_))
    }
}

// =============================================================================
// Stream Types
// =============================================================================

/// Capability type markers used by encrypted container formats
pub const PROTECTED_MEDIA_TYPES: &[&str] = &[
    "application/x-cenc",
    "application/x-cbcs",
    "application/x-webm-enc",
    "video/x-encrypted",
    "audio/x-encrypted",
];

/// Negotiated capability of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Name of the first caps structure, e.g. `video/x-raw`
    pub media_type: String,
    /// Media type wrapped by an encrypted container marker, if any
    pub original_media_type: Option<String>,
    /// Full serialized form, as reported by the engine
    pub description: String,
}

impl Capability {
    pub fn new(media_type: impl Into<String>) -> Self {
        let media_type = media_type.into();
        Self {
            description: media_type.clone(),
            media_type,
            original_media_type: None,
        }
    }

    /// Encrypted capability wrapping `original`
    pub fn protected(marker: impl Into<String>, original: impl Into<String>) -> Self {
        let marker = marker.into();
        let original = original.into();
        Self {
            description: format!("{}, original-media-type=(string){}", marker, original),
            media_type: marker,
            original_media_type: Some(original),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.media_type.trim().is_empty()
    }

    pub fn is_protected(&self) -> bool {
        PROTECTED_MEDIA_TYPES.contains(&self.media_type.as_str())
    }

    /// Media type used for classification. Encrypted markers defer to the
    /// wrapped type so a protected video stream still routes to video.
    pub fn effective_media_type(&self) -> &str {
        match (&self.original_media_type, self.is_protected()) {
            (Some(original), true) => original,
            _ => &self.media_type,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Unknown,
}

impl StreamKind {
    /// Classify by capability-type prefix
    pub fn from_media_type(media_type: &str) -> Self {
        if media_type.starts_with("video/") {
            StreamKind::Video
        } else if media_type.starts_with("audio/") {
            StreamKind::Audio
        } else {
            StreamKind::Unknown
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Description of a discovered elementary stream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub content_protected: bool,
    pub capability: Capability,
}

impl StreamDescriptor {
    pub fn from_capability(capability: Capability) -> Self {
        Self {
            kind: StreamKind::from_media_type(capability.effective_media_type()),
            content_protected: capability.is_protected(),
            capability,
        }
    }
}

/// A newly exposed demuxer endpoint, as delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub endpoint: Endpoint,
    /// Current caps, or the queried caps when none are fixed yet
    pub capability: Option<Capability>,
}

// =============================================================================
// Playback Types
// =============================================================================

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolution used by the reduced quality tier
    pub const REDUCED: Resolution = Resolution { width: 640, height: 360 };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Coarse playback-resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Full,
    Reduced,
}

impl QualityTier {
    pub fn toggled(self) -> Self {
        match self {
            QualityTier::Full => QualityTier::Reduced,
            QualityTier::Reduced => QualityTier::Full,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Full => write!(f, "full"),
            QualityTier::Reduced => write!(f, "reduced"),
        }
    }
}

/// Interval between two consecutive presented frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSample {
    pub interval_ms: i64,
}

/// Graph state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Not constructed yet, or torn down
    #[default]
    Null,
    /// Resources allocated, not prerolled
    Ready,
    Paused,
    Playing,
}

impl PlaybackState {
    /// Playing or Paused
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Null => write!(f, "null"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Playing => write!(f, "playing"),
        }
    }
}

/// Asynchronous notification from the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum StatusEvent {
    Error(String),
    EndOfStream,
}

/// Text of the play/pause control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlLabel {
    #[default]
    Play,
    Pause,
}

impl fmt::Display for ControlLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlLabel::Play => write!(f, "Play"),
            ControlLabel::Pause => write!(f, "Pause"),
        }
    }
}

/// Position and duration as last polled from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionInfo {
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
}

/// Rectangle on the render surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl RenderRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

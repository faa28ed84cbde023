//! Media engine contract
//!
//! The orchestration core never decodes, demuxes or renders anything
//! itself. It drives an external engine through this trait:
//!
//! - stage construction and static linking
//! - dynamic endpoint linking as the demuxer exposes streams
//! - state requests (applied asynchronously by the engine)
//! - position/duration queries and flushing seeks
//! - push channels for status events and stream discovery
//! - synchronous hooks on the engine's streaming thread (buffer probes,
//!   surface preparation)
//!
//! Requests return as soon as the engine has accepted them. Completion is
//! observed through the status channel, never through return values.

use crate::{
    surface::SurfaceAssignment,
    types::*,
    Result,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default name of a stage's input endpoint
pub const INPUT_ENDPOINT: &str = "sink";
/// Default name of a stage's output endpoint
pub const OUTPUT_ENDPOINT: &str = "src";

/// Callback run on the engine's streaming thread for every buffer crossing
/// a probed endpoint. Receives the buffer's presentation timestamp.
pub type BufferProbe = Box<dyn Fn(Option<Duration>) + Send + Sync + 'static>;

/// Callback run synchronously on the engine thread when the video sink
/// asks for a render surface. Returning `None` skips this notification.
pub type SurfacePreparationHandler =
    Box<dyn Fn() -> Option<SurfaceAssignment> + Send + Sync + 'static>;

/// What a state request applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    Graph,
    Stage(StageId),
}

/// Seek behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekFlags {
    /// Drop in-flight data before seeking
    pub flush: bool,
    /// Snap to the nearest sync point at or before the target
    pub key_unit: bool,
}

impl SeekFlags {
    pub const FLUSH_KEY_UNIT: SeekFlags = SeekFlags { flush: true, key_unit: true };
}

/// Property value accepted by [`Engine::set_property`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    /// Raw-video dimension constraint; `None` clears it
    Dimensions(Option<Resolution>),
}

/// External media engine
pub trait Engine: Send + Sync {
    /// Human-readable engine name and version
    fn name(&self) -> String;

    /// One-time process-wide initialization. Must be idempotent.
    fn init(&self) -> Result<()>;

    /// Construct a stage; `None` when the factory is unavailable
    fn create_stage(&self, kind: StageKind, factory: &str, name: &str) -> Option<StageId>;

    /// Hand stages over to the session graph
    fn add_to_graph(&self, stages: &[StageId]) -> Result<()>;

    /// Static link between the default endpoints of two stages
    fn link_stages(&self, upstream: StageId, downstream: StageId) -> Result<()>;

    /// Link an output endpoint to an input endpoint
    fn link(&self, output: &Endpoint, input: &Endpoint) -> LinkOutcome;

    /// Undo a dynamic link. False when the two were not linked.
    fn unlink(&self, output: &Endpoint, input: &Endpoint) -> bool;

    /// Request a state change; completes asynchronously
    fn set_state(&self, target: StateTarget, state: PlaybackState) -> Result<()>;

    /// Last state the graph reached, without waiting
    fn current_state(&self) -> PlaybackState;

    fn query_position(&self) -> Option<Duration>;

    /// `None` while the duration is not yet known
    fn query_duration(&self) -> Option<Duration>;

    fn seek(&self, target: Duration, flags: SeekFlags) -> Result<()>;

    fn set_property(&self, stage: StageId, name: &str, value: PropertyValue) -> Result<()>;

    /// Ask the stage to renegotiate its output format. Fire-and-forget.
    fn request_renegotiation(&self, stage: StageId);

    /// Error and end-of-stream notifications
    fn subscribe_status_events(&self) -> mpsc::UnboundedReceiver<StatusEvent>;

    /// Endpoints the demuxer exposes as it discovers elementary streams,
    /// delivered in order
    fn subscribe_stream_discovery(
        &self,
        demuxer: StageId,
    ) -> mpsc::UnboundedReceiver<DiscoveredEndpoint>;

    /// Routing for a discovered endpoint is settled (linked or abandoned).
    /// Engines that hold data on fresh endpoints release it here.
    fn finish_discovery(&self, endpoint: &Endpoint);

    fn subscribe_surface_preparation(&self, sink: StageId, handler: SurfacePreparationHandler);

    fn set_render_rectangle(&self, sink: StageId, rect: RenderRect);

    fn attach_buffer_probe(&self, endpoint: &Endpoint, probe: BufferProbe) -> Result<()>;

    /// Drop the engine's reference to a stage. Called in reverse
    /// construction order during teardown.
    fn release(&self, stage: StageId);
}

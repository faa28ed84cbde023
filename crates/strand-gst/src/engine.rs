//! GStreamer engine
//!
//! Implements the orchestration core's engine contract on top of a single
//! `gst::Pipeline`. Stages are GStreamer elements addressed by id, bus
//! traffic is handled synchronously on the posting thread, and demuxer
//! pads are held with a blocking probe until the router has settled them.

use anyhow::Context;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strand_core::{
    engine::*,
    surface::SurfaceAssignment,
    types::*,
    Error, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

static GST_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize GStreamer once per process
pub fn init_gstreamer() -> Result<()> {
    if GST_INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }
    gst::init().map_err(|e| Error::EngineRuntime(format!("GStreamer init failed: {}", e)))?;
    if !GST_INITIALIZED.swap(true, Ordering::AcqRel) {
        info!(version = %gst::version_string(), "GStreamer initialized");
    }
    Ok(())
}

type SurfaceHandler = Arc<dyn Fn() -> Option<SurfaceAssignment> + Send + Sync>;

/// Receivers of bus traffic. Shared with the bus sync handler.
#[derive(Default)]
struct BusRoutes {
    status: Vec<mpsc::UnboundedSender<StatusEvent>>,
    surfaces: Vec<(gst::Element, SurfaceHandler)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine backed by a GStreamer pipeline
pub struct GstEngine {
    pipeline: gst::Pipeline,
    next_id: AtomicU32,
    elements: Mutex<HashMap<StageId, gst::Element>>,
    routes: Arc<Mutex<BusRoutes>>,
    /// Demuxer pads held until routing settles
    held: Arc<Mutex<HashMap<(StageId, String), (gst::Pad, gst::PadProbeId)>>>,
}

impl GstEngine {
    pub fn new() -> anyhow::Result<Self> {
        init_gstreamer().context("Failed to initialize GStreamer")?;

        let pipeline = gst::Pipeline::builder().name("strand-pipeline").build();
        let routes = Arc::new(Mutex::new(BusRoutes::default()));

        let bus = pipeline.bus().context("Pipeline has no bus")?;
        let bus_routes = routes.clone();
        bus.set_sync_handler(move |_bus, msg| {
            handle_bus_message(&bus_routes, msg);
            gst::BusSyncReply::Drop
        });

        Ok(Self {
            pipeline,
            next_id: AtomicU32::new(1),
            elements: Mutex::new(HashMap::new()),
            routes,
            held: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn shared() -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self::new()?))
    }

    fn element(&self, id: StageId) -> Option<gst::Element> {
        lock(&self.elements).get(&id).cloned()
    }

    fn require(&self, id: StageId) -> Result<gst::Element> {
        self.element(id)
            .ok_or_else(|| Error::Internal(format!("no element for {}", id)))
    }

    fn pad(&self, endpoint: &Endpoint) -> Option<gst::Pad> {
        self.element(endpoint.stage)?.static_pad(&endpoint.pad)
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn to_gst_state(state: PlaybackState) -> gst::State {
    match state {
        PlaybackState::Null => gst::State::Null,
        PlaybackState::Ready => gst::State::Ready,
        PlaybackState::Paused => gst::State::Paused,
        PlaybackState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> PlaybackState {
    match state {
        gst::State::Ready => PlaybackState::Ready,
        gst::State::Paused => PlaybackState::Paused,
        gst::State::Playing => PlaybackState::Playing,
        _ => PlaybackState::Null,
    }
}

fn link_error_code(err: gst::PadLinkError) -> &'static str {
    match err {
        gst::PadLinkError::WasLinked => "WAS_LINKED",
        gst::PadLinkError::WrongHierarchy => "WRONG_HIERARCHY",
        gst::PadLinkError::Noformat => "NOFORMAT",
        gst::PadLinkError::Nosched => "NOSCHED",
        gst::PadLinkError::Refused => "REFUSED",
        _ => "UNKNOWN",
    }
}

fn to_duration(time: gst::ClockTime) -> Duration {
    Duration::from_nanos(time.nseconds())
}

/// Capability of a freshly exposed pad: fixed caps if any, else the query
fn capability_of(pad: &gst::Pad) -> Option<Capability> {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    let structure = caps.structure(0)?;
    let media_type = structure.name().to_string();
    let original_media_type = structure.get::<String>("original-media-type").ok();
    Some(Capability {
        media_type,
        original_media_type,
        description: caps.to_string(),
    })
}

/// The element implementing the overlay interface, looking inside bins
fn overlay_of(element: &gst::Element) -> Option<gst_video::VideoOverlay> {
    if let Some(overlay) = element.dynamic_cast_ref::<gst_video::VideoOverlay>() {
        return Some(overlay.clone());
    }
    element
        .downcast_ref::<gst::Bin>()?
        .by_interface(gst_video::VideoOverlay::static_type())?
        .dynamic_cast::<gst_video::VideoOverlay>()
        .ok()
}

/// Overlay calls needed to put video on a native surface
trait OverlayTarget {
    fn assign_handle(&self, handle: u64);
    fn assign_rect(&self, rect: RenderRect);
    fn redraw(&self);
}

impl OverlayTarget for gst_video::VideoOverlay {
    fn assign_handle(&self, handle: u64) {
        // SAFETY: the handle was validated by the surface binder and belongs
        // to a window that outlives the pipeline.
        unsafe {
            self.set_window_handle(handle as usize);
        }
    }

    fn assign_rect(&self, rect: RenderRect) {
        if let Err(e) = self.set_render_rectangle(rect.x, rect.y, rect.width, rect.height) {
            debug!(error = %e, "Sink ignored render rectangle");
        }
    }

    fn redraw(&self) {
        self.expose();
    }
}

fn apply_surface(overlay: &impl OverlayTarget, assignment: SurfaceAssignment) {
    overlay.assign_handle(assignment.handle);
    apply_rect(overlay, assignment.rect);
}

fn apply_rect(overlay: &impl OverlayTarget, rect: RenderRect) {
    overlay.assign_rect(rect);
    overlay.redraw();
}

fn handle_bus_message(routes: &Mutex<BusRoutes>, msg: &gst::Message) {
    use gst::MessageView;

    if gst_video::is_video_overlay_prepare_window_handle_message(msg) {
        let Some(overlay) = msg
            .src()
            .and_then(|src| src.dynamic_cast_ref::<gst_video::VideoOverlay>().cloned())
        else {
            return;
        };
        let handlers: Vec<SurfaceHandler> = lock(routes)
            .surfaces
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            if let Some(assignment) = handler() {
                apply_surface(&overlay, assignment);
                debug!(handle = assignment.handle, "Window handle applied");
                break;
            }
        }
        return;
    }

    let event = match msg.view() {
        MessageView::Error(err) => {
            error!(
                source = ?msg.src().map(|s| s.path_string()),
                debug = ?err.debug(),
                "GStreamer error: {}",
                err.error()
            );
            StatusEvent::Error(err.error().to_string())
        }
        MessageView::Eos(_) => StatusEvent::EndOfStream,
        MessageView::Warning(w) => {
            warn!(debug = ?w.debug(), "GStreamer warning: {}", w.error());
            return;
        }
        _ => return,
    };
    lock(routes).status.retain(|tx| tx.send(event.clone()).is_ok());
}

impl Engine for GstEngine {
    fn name(&self) -> String {
        format!("GStreamer {}", gst::version_string())
    }

    fn init(&self) -> Result<()> {
        init_gstreamer()
    }

    fn create_stage(&self, kind: StageKind, factory: &str, name: &str) -> Option<StageId> {
        let element = match gst::ElementFactory::make(factory).name(name).build() {
            Ok(element) => element,
            Err(e) => {
                debug!(factory, name, error = %e, "Element unavailable");
                return None;
            }
        };
        let id = StageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%id, %kind, factory, name, "Element created");
        lock(&self.elements).insert(id, element);
        Some(id)
    }

    fn add_to_graph(&self, stages: &[StageId]) -> Result<()> {
        for id in stages {
            let element = self.require(*id)?;
            self.pipeline
                .add(&element)
                .map_err(|e| Error::Internal(format!("adding {}: {}", element.name(), e)))?;
        }
        Ok(())
    }

    fn link_stages(&self, upstream: StageId, downstream: StageId) -> Result<()> {
        let up = self.require(upstream)?;
        let down = self.require(downstream)?;
        up.link(&down)
            .map_err(|e| Error::link(up.name(), down.name(), e.to_string()))
    }

    fn link(&self, output: &Endpoint, input: &Endpoint) -> LinkOutcome {
        let (Some(src), Some(sink)) = (self.pad(output), self.pad(input)) else {
            return LinkOutcome::Failed("NOPAD".into());
        };
        if sink.is_linked() {
            return LinkOutcome::AlreadyLinked;
        }
        match src.link(&sink) {
            Ok(_) => LinkOutcome::Linked,
            Err(e) => LinkOutcome::Failed(link_error_code(e).into()),
        }
    }

    fn unlink(&self, output: &Endpoint, input: &Endpoint) -> bool {
        let (Some(src), Some(sink)) = (self.pad(output), self.pad(input)) else {
            return false;
        };
        match src.unlink(&sink) {
            Ok(()) => true,
            Err(e) => {
                debug!(from = %output, to = %input, error = %e, "Unlink refused");
                false
            }
        }
    }

    fn set_state(&self, target: StateTarget, state: PlaybackState) -> Result<()> {
        let (element, label) = match target {
            StateTarget::Graph => (self.pipeline.clone().upcast::<gst::Element>(), "pipeline".to_string()),
            StateTarget::Stage(id) => {
                let element = self.require(id)?;
                let label = element.name().to_string();
                (element, label)
            }
        };
        element
            .set_state(to_gst_state(state))
            .map(|_| ())
            .map_err(|_| Error::StateChange {
                target: label,
                state: state.to_string(),
            })
    }

    fn current_state(&self) -> PlaybackState {
        from_gst_state(self.pipeline.current_state())
    }

    fn query_position(&self) -> Option<Duration> {
        self.pipeline.query_position::<gst::ClockTime>().map(to_duration)
    }

    fn query_duration(&self) -> Option<Duration> {
        self.pipeline.query_duration::<gst::ClockTime>().map(to_duration)
    }

    fn seek(&self, target: Duration, flags: SeekFlags) -> Result<()> {
        let mut gst_flags = gst::SeekFlags::empty();
        if flags.flush {
            gst_flags |= gst::SeekFlags::FLUSH;
        }
        if flags.key_unit {
            gst_flags |= gst::SeekFlags::KEY_UNIT;
        }
        let position = gst::ClockTime::from_nseconds(target.as_nanos() as u64);
        self.pipeline
            .seek_simple(gst_flags, position)
            .map_err(|e| Error::Seek(e.to_string()))
    }

    fn set_property(&self, stage: StageId, name: &str, value: PropertyValue) -> Result<()> {
        let element = self.require(stage)?;
        if element.find_property(name).is_none() {
            return Err(Error::Internal(format!("{} has no property {}", element.name(), name)));
        }
        match value {
            PropertyValue::Text(text) => element.set_property_from_str(name, &text),
            PropertyValue::Dimensions(Some(res)) => {
                let caps = gst::Caps::builder("video/x-raw")
                    .field("width", res.width as i32)
                    .field("height", res.height as i32)
                    .build();
                element.set_property(name, &caps);
            }
            PropertyValue::Dimensions(None) => element.set_property(name, gst::Caps::new_any()),
        }
        Ok(())
    }

    fn request_renegotiation(&self, stage: StageId) {
        let Some(pad) = self.element(stage).and_then(|e| e.static_pad(OUTPUT_ENDPOINT)) else {
            warn!(%stage, "No output pad to renegotiate");
            return;
        };
        if !pad.send_event(gst::event::Reconfigure::new()) {
            debug!(%stage, "Reconfigure not handled");
        }
    }

    fn subscribe_status_events(&self) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.routes).status.push(tx);
        rx
    }

    fn subscribe_stream_discovery(
        &self,
        demuxer: StageId,
    ) -> mpsc::UnboundedReceiver<DiscoveredEndpoint> {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(element) = self.element(demuxer) else {
            warn!(%demuxer, "No demuxer to watch");
            return rx;
        };

        let stage_name = element.name().to_string();
        let held = self.held.clone();
        element.connect_pad_added(move |_element, pad| {
            let pad_name = pad.name().to_string();
            let endpoint = if pad.direction() == gst::PadDirection::Src {
                Endpoint::output(demuxer, &stage_name, &pad_name)
            } else {
                Endpoint::input(demuxer, &stage_name, &pad_name)
            };

            if endpoint.is_output() {
                if let Some(id) =
                    pad.add_probe(gst::PadProbeType::BLOCK_DOWNSTREAM, |_, _| gst::PadProbeReturn::Ok)
                {
                    lock(&held).insert((demuxer, pad_name.clone()), (pad.clone(), id));
                }
            }

            let discovered = DiscoveredEndpoint {
                endpoint,
                capability: capability_of(pad),
            };
            debug!(pad = %pad_name, caps = ?discovered.capability.as_ref().map(|c| &c.media_type), "Pad added");
            if tx.send(discovered).is_err() {
                // Nobody routes any more; do not hold the stream.
                if let Some((pad, id)) = lock(&held).remove(&(demuxer, pad_name)) {
                    pad.remove_probe(id);
                }
            }
        });
        rx
    }

    fn finish_discovery(&self, endpoint: &Endpoint) {
        let entry = lock(&self.held).remove(&(endpoint.stage, endpoint.pad.clone()));
        if let Some((pad, id)) = entry {
            pad.remove_probe(id);
            trace!(endpoint = %endpoint, "Pad released");
        }
    }

    fn subscribe_surface_preparation(&self, sink: StageId, handler: SurfacePreparationHandler) {
        let Some(element) = self.element(sink) else {
            warn!(%sink, "No sink for surface preparation");
            return;
        };
        lock(&self.routes).surfaces.push((element, Arc::from(handler)));
    }

    fn set_render_rectangle(&self, sink: StageId, rect: RenderRect) {
        let Some(overlay) = self.element(sink).as_ref().and_then(overlay_of) else {
            debug!(%sink, "Sink has no overlay interface");
            return;
        };
        apply_rect(&overlay, rect);
    }

    fn attach_buffer_probe(&self, endpoint: &Endpoint, probe: BufferProbe) -> Result<()> {
        let pad = self
            .pad(endpoint)
            .ok_or_else(|| Error::Internal(format!("no pad {}", endpoint)))?;
        pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
            let pts = info.buffer().and_then(|buffer| buffer.pts()).map(to_duration);
            probe(pts);
            gst::PadProbeReturn::Ok
        })
        .ok_or_else(|| Error::Internal(format!("probe rejected on {}", endpoint)))?;
        Ok(())
    }

    fn release(&self, stage: StageId) {
        let Some(element) = lock(&self.elements).remove(&stage) else {
            return;
        };
        lock(&self.held).retain(|(id, _), _| *id != stage);
        lock(&self.routes).surfaces.retain(|(e, _)| e != &element);
        let _ = element.set_state(gst::State::Null);
        if element.parent().is_some() {
            if let Err(e) = self.pipeline.remove(&element) {
                debug!(element = %element.name(), error = %e, "Element not removed");
            }
        }
    }
}

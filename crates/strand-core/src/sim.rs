//! In-memory engine
//!
//! Implements [`Engine`] without any media framework. Stages are plain
//! records, links are checked against the same rules a real engine
//! applies, and every request is logged so callers can assert on what the
//! orchestration layer asked for. Streams, frames and status events are
//! injected by hand.
//!
//! Encrypted payload that reaches anything other than a decryptor is
//! reported as an engine error once the graph starts playing, the way a
//! real decoder refuses ciphertext.

use crate::{
    engine::*,
    surface::SurfaceAssignment,
    types::*,
    Error, Result,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

type SharedProbe = Arc<dyn Fn(Option<Duration>) + Send + Sync>;
type SharedSurfaceHandler = Arc<dyn Fn() -> Option<SurfaceAssignment> + Send + Sync>;

#[derive(Debug, Clone)]
struct SimStage {
    kind: StageKind,
    name: String,
    factory: String,
    state: PlaybackState,
    in_graph: bool,
}

#[derive(Default)]
struct SimState {
    next_id: u32,
    stages: BTreeMap<StageId, SimStage>,
    unavailable: HashSet<String>,
    refuse_links_into: HashSet<String>,
    refuse_links_between: HashSet<(String, String)>,
    failing_properties: HashSet<(String, String)>,
    position_hidden: bool,
    static_links: Vec<(StageId, StageId)>,
    links: Vec<(Endpoint, Endpoint)>,
    link_attempts: Vec<(Endpoint, Endpoint)>,
    exposed: HashMap<Endpoint, Option<Capability>>,
    finished: Vec<Endpoint>,
    undecrypted_flow: Option<String>,
    state: PlaybackState,
    state_requests: Vec<(StateTarget, PlaybackState)>,
    position: Duration,
    duration: Option<Duration>,
    seeks: Vec<(Duration, SeekFlags)>,
    properties: HashMap<(StageId, String), PropertyValue>,
    renegotiations: Vec<StageId>,
    status_tx: Vec<mpsc::UnboundedSender<StatusEvent>>,
    discovery_tx: Vec<mpsc::UnboundedSender<DiscoveredEndpoint>>,
    demuxer: Option<StageId>,
    surface_handlers: Vec<(StageId, SharedSurfaceHandler)>,
    surface_assignments: Vec<SurfaceAssignment>,
    render_rects: Vec<(StageId, RenderRect)>,
    probes: Vec<(Endpoint, SharedProbe)>,
    released: Vec<String>,
}

impl SimState {
    fn stage_by_name(&self, name: &str) -> Option<StageId> {
        self.stages
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| *id)
    }

    fn input_linked(&self, input: &Endpoint) -> bool {
        self.links.iter().any(|(_, i)| i == input)
    }

    fn output_linked(&self, output: &Endpoint) -> bool {
        self.links.iter().any(|(o, _)| o == output)
    }
}

/// Engine that keeps everything in memory
pub struct SimEngine {
    inner: Mutex<SimState>,
    inits: AtomicUsize,
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimState {
                next_id: 1,
                ..Default::default()
            }),
            inits: AtomicUsize::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    /// Make a factory unavailable to `create_stage`
    pub fn remove_factory(&self, factory: &str) {
        self.lock().unavailable.insert(factory.to_string());
    }

    /// Refuse every dynamic link into the named stage
    pub fn refuse_links_into(&self, stage_name: &str) {
        self.lock().refuse_links_into.insert(stage_name.to_string());
    }

    /// Refuse dynamic links from one named stage into another
    pub fn refuse_link(&self, from_stage: &str, to_stage: &str) {
        self.lock()
            .refuse_links_between
            .insert((from_stage.to_string(), to_stage.to_string()));
    }

    /// Make `set_property` fail for one property of a named stage
    pub fn fail_property(&self, stage_name: &str, property: &str) {
        self.lock()
            .failing_properties
            .insert((stage_name.to_string(), property.to_string()));
    }

    /// Make position queries fail while the duration is still answered
    pub fn hide_position(&self, hidden: bool) {
        self.lock().position_hidden = hidden;
    }

    // ------------------------------------------------------------------
    // Driving the simulation
    // ------------------------------------------------------------------

    /// Duration reported once the graph has prerolled
    pub fn set_duration(&self, duration: Option<Duration>) {
        self.lock().duration = duration;
    }

    /// Advance the playback clock. Only moves while Playing and never past
    /// the duration.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        if state.state != PlaybackState::Playing {
            return;
        }
        let next = state.position + by;
        state.position = match state.duration {
            Some(duration) => next.min(duration),
            None => next,
        };
    }

    /// Expose a new demuxer output carrying `capability`
    pub fn expose_stream(&self, pad: &str, capability: Option<Capability>) -> Endpoint {
        let demuxer = {
            let state = self.lock();
            state
                .demuxer
                .or_else(|| {
                    state
                        .stages
                        .iter()
                        .find(|(_, s)| s.kind == StageKind::Demultiplexer)
                        .map(|(id, _)| *id)
                })
                .unwrap_or(StageId(0))
        };
        let endpoint = Endpoint::output(demuxer, "dbin", pad);
        self.expose(DiscoveredEndpoint {
            endpoint: endpoint.clone(),
            capability,
        });
        endpoint
    }

    /// Deliver an arbitrary discovery notification
    pub fn expose(&self, discovered: DiscoveredEndpoint) {
        let mut state = self.lock();
        state
            .exposed
            .insert(discovered.endpoint.clone(), discovered.capability.clone());
        debug!(endpoint = %discovered.endpoint, "Sim stream exposed");
        state
            .discovery_tx
            .retain(|tx| tx.send(discovered.clone()).is_ok());
    }

    /// Post an error or end-of-stream notification
    pub fn post_status(&self, event: StatusEvent) {
        self.lock().status_tx.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Present one frame: run every buffer probe with `pts`
    pub fn push_frame(&self, pts: Option<Duration>) -> usize {
        let probes: Vec<SharedProbe> = self.lock().probes.iter().map(|(_, p)| p.clone()).collect();
        for probe in &probes {
            probe(pts);
        }
        probes.len()
    }

    /// Ask every registered handler for a surface, as a sink would before
    /// its first frame. Returns the assignment that was applied, if any.
    pub fn request_surface(&self) -> Option<SurfaceAssignment> {
        let handlers: Vec<(StageId, SharedSurfaceHandler)> = self.lock().surface_handlers.clone();
        let mut applied = None;
        for (sink, handler) in handlers {
            if let Some(assignment) = handler() {
                let mut state = self.lock();
                state.surface_assignments.push(assignment);
                state.render_rects.push((sink, assignment.rect));
                applied = Some(assignment);
            }
        }
        applied
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.lock().stage_by_name(name)
    }

    /// Factory behind a named stage
    pub fn stage_factory(&self, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .stages
            .values()
            .find(|s| s.name == name)
            .map(|s| s.factory.clone())
    }

    /// Names of live stages in creation order
    pub fn stage_names(&self) -> Vec<String> {
        self.lock().stages.values().map(|s| s.name.clone()).collect()
    }

    pub fn stage_state(&self, name: &str) -> Option<PlaybackState> {
        let state = self.lock();
        state.stages.values().find(|s| s.name == name).map(|s| s.state)
    }

    /// Dynamic links in place, as `(output, input)`
    pub fn links(&self) -> Vec<(Endpoint, Endpoint)> {
        self.lock().links.clone()
    }

    /// Every dynamic link request, in order, including refused ones
    pub fn link_attempts(&self) -> Vec<(Endpoint, Endpoint)> {
        self.lock().link_attempts.clone()
    }

    pub fn static_link_count(&self) -> usize {
        self.lock().static_links.len()
    }

    pub fn state_requests(&self) -> Vec<(StateTarget, PlaybackState)> {
        self.lock().state_requests.clone()
    }

    pub fn seeks(&self) -> Vec<(Duration, SeekFlags)> {
        self.lock().seeks.clone()
    }

    pub fn property(&self, stage_name: &str, property: &str) -> Option<PropertyValue> {
        let state = self.lock();
        let id = state.stage_by_name(stage_name)?;
        state.properties.get(&(id, property.to_string())).cloned()
    }

    pub fn renegotiation_count(&self) -> usize {
        self.lock().renegotiations.len()
    }

    /// Endpoints whose routing was reported settled
    pub fn finished_discoveries(&self) -> Vec<Endpoint> {
        self.lock().finished.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probes.len()
    }

    pub fn surface_assignments(&self) -> Vec<SurfaceAssignment> {
        self.lock().surface_assignments.clone()
    }

    pub fn render_rects(&self) -> Vec<RenderRect> {
        self.lock().render_rects.iter().map(|(_, r)| *r).collect()
    }

    /// Released stage names, in release order
    pub fn released(&self) -> Vec<String> {
        self.lock().released.clone()
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SimEngine {
    fn name(&self) -> String {
        format!("strand-sim {}", crate::VERSION)
    }

    fn init(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_stage(&self, kind: StageKind, factory: &str, name: &str) -> Option<StageId> {
        let mut state = self.lock();
        if state.unavailable.contains(factory) {
            return None;
        }
        let id = StageId(state.next_id);
        state.next_id += 1;
        state.stages.insert(
            id,
            SimStage {
                kind,
                name: name.to_string(),
                factory: factory.to_string(),
                state: PlaybackState::Null,
                in_graph: false,
            },
        );
        trace!(%id, factory, name, "Sim stage created");
        Some(id)
    }

    fn add_to_graph(&self, stages: &[StageId]) -> Result<()> {
        let mut state = self.lock();
        for id in stages {
            let stage = state
                .stages
                .get_mut(id)
                .ok_or_else(|| Error::Internal(format!("unknown stage {}", id)))?;
            stage.in_graph = true;
        }
        Ok(())
    }

    fn link_stages(&self, upstream: StageId, downstream: StageId) -> Result<()> {
        let mut state = self.lock();
        let (Some(up), Some(down)) = (state.stages.get(&upstream), state.stages.get(&downstream))
        else {
            return Err(Error::link(upstream, downstream, "NOSTAGE"));
        };
        if !up.in_graph || !down.in_graph {
            return Err(Error::link(&up.name, &down.name, "WRONG_HIERARCHY"));
        }
        state.static_links.push((upstream, downstream));
        Ok(())
    }

    fn link(&self, output: &Endpoint, input: &Endpoint) -> LinkOutcome {
        let mut state = self.lock();
        state.link_attempts.push((output.clone(), input.clone()));

        let Some(downstream) = state.stages.get(&input.stage).cloned() else {
            return LinkOutcome::Failed("NOSTAGE".into());
        };
        if !state.stages.contains_key(&output.stage) {
            return LinkOutcome::Failed("NOSTAGE".into());
        }
        if state.input_linked(input) {
            return LinkOutcome::AlreadyLinked;
        }
        if state.output_linked(output) {
            return LinkOutcome::Failed("WAS_LINKED".into());
        }
        if state.refuse_links_into.contains(&downstream.name)
            || state
                .refuse_links_between
                .contains(&(output.stage_name.clone(), downstream.name.clone()))
        {
            return LinkOutcome::Failed("NOFORMAT".into());
        }

        let carries_ciphertext = state
            .exposed
            .get(output)
            .and_then(|caps| caps.as_ref())
            .is_some_and(|caps| caps.is_protected());
        if carries_ciphertext && downstream.kind != StageKind::Decryptor {
            state.undecrypted_flow = Some(downstream.name.clone());
        }

        state.links.push((output.clone(), input.clone()));
        LinkOutcome::Linked
    }

    fn unlink(&self, output: &Endpoint, input: &Endpoint) -> bool {
        let mut state = self.lock();
        let before = state.links.len();
        state.links.retain(|(o, i)| !(o == output && i == input));
        if state.links.len() == before {
            return false;
        }
        if state.undecrypted_flow.as_deref() == Some(input.stage_name.as_str()) {
            state.undecrypted_flow = None;
        }
        true
    }

    fn set_state(&self, target: StateTarget, requested: PlaybackState) -> Result<()> {
        let mut state = self.lock();
        state.state_requests.push((target, requested));
        match target {
            StateTarget::Stage(id) => {
                let stage = state
                    .stages
                    .get_mut(&id)
                    .ok_or_else(|| Error::StateChange {
                        target: id.to_string(),
                        state: requested.to_string(),
                    })?;
                stage.state = requested;
            }
            StateTarget::Graph => {
                state.state = requested;
                for stage in state.stages.values_mut().filter(|s| s.in_graph) {
                    stage.state = requested;
                }
                if requested == PlaybackState::Null {
                    state.position = Duration::ZERO;
                }
                if requested == PlaybackState::Playing {
                    if let Some(stage) = state.undecrypted_flow.clone() {
                        let event = StatusEvent::Error(format!(
                            "Encrypted data reached {} without a decryptor",
                            stage
                        ));
                        state.status_tx.retain(|tx| tx.send(event.clone()).is_ok());
                    }
                }
            }
        }
        Ok(())
    }

    fn current_state(&self) -> PlaybackState {
        self.lock().state
    }

    fn query_position(&self) -> Option<Duration> {
        let state = self.lock();
        (state.state.is_active() && !state.position_hidden).then_some(state.position)
    }

    fn query_duration(&self) -> Option<Duration> {
        let state = self.lock();
        if state.state.is_active() {
            state.duration
        } else {
            None
        }
    }

    fn seek(&self, target: Duration, flags: SeekFlags) -> Result<()> {
        let mut state = self.lock();
        if !state.state.is_active() {
            return Err(Error::Seek(format!("graph is {}", state.state)));
        }
        state.seeks.push((target, flags));
        state.position = match state.duration {
            Some(duration) => target.min(duration),
            None => target,
        };
        Ok(())
    }

    fn set_property(&self, stage: StageId, name: &str, value: PropertyValue) -> Result<()> {
        let mut state = self.lock();
        let Some(target) = state.stages.get(&stage) else {
            return Err(Error::Internal(format!("unknown stage {}", stage)));
        };
        if state
            .failing_properties
            .contains(&(target.name.clone(), name.to_string()))
        {
            return Err(Error::Internal(format!("{} rejected property {}", target.name, name)));
        }
        state.properties.insert((stage, name.to_string()), value);
        Ok(())
    }

    fn request_renegotiation(&self, stage: StageId) {
        self.lock().renegotiations.push(stage);
    }

    fn subscribe_status_events(&self) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().status_tx.push(tx);
        rx
    }

    fn subscribe_stream_discovery(
        &self,
        demuxer: StageId,
    ) -> mpsc::UnboundedReceiver<DiscoveredEndpoint> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.demuxer = Some(demuxer);
        state.discovery_tx.push(tx);
        rx
    }

    fn finish_discovery(&self, endpoint: &Endpoint) {
        self.lock().finished.push(endpoint.clone());
    }

    fn subscribe_surface_preparation(&self, sink: StageId, handler: SurfacePreparationHandler) {
        self.lock().surface_handlers.push((sink, Arc::from(handler)));
    }

    fn set_render_rectangle(&self, sink: StageId, rect: RenderRect) {
        self.lock().render_rects.push((sink, rect));
    }

    fn attach_buffer_probe(&self, endpoint: &Endpoint, probe: BufferProbe) -> Result<()> {
        let mut state = self.lock();
        if !state.stages.contains_key(&endpoint.stage) {
            return Err(Error::Internal(format!("no stage behind {}", endpoint)));
        }
        state.probes.push((endpoint.clone(), Arc::from(probe)));
        Ok(())
    }

    fn release(&self, stage: StageId) {
        let mut state = self.lock();
        if let Some(removed) = state.stages.remove(&stage) {
            state.links.retain(|(o, i)| o.stage != stage && i.stage != stage);
            state.probes.retain(|(e, _)| e.stage != stage);
            state.surface_handlers.retain(|(s, _)| *s != stage);
            state.released.push(removed.name);
        }
    }
}

//! Playback Session - Main orchestrator for one playback
//!
//! Coordinates:
//! - Graph construction and teardown
//! - Stream routing as the demuxer discovers streams
//! - Play/pause/seek and the control-side state machine
//! - Quality tier toggling
//! - Frame telemetry and position publication
//!
//! All control operations run on one task. Engine notifications (status
//! events, stream discovery) arrive on channels and are handled by the same
//! task, so graph mutation is never concurrent. Only the buffer probe runs
//! on the engine's streaming thread, and it touches nothing but the shared
//! metrics collector.

use crate::{
    analytics::{TelemetryEmitter, TelemetryEvent, TelemetryRecord},
    config::{MediaSource, PlayerConfig},
    engine::{Engine, SeekFlags},
    graph::PipelineGraph,
    metrics::{MetricsCollector, SharedMetrics},
    quality::QualityController,
    router::{RouteOutcome, StreamRouter},
    sink::{Platform, SinkSelector},
    surface::{SurfaceBinder, SurfaceProvider},
    types::*,
    Error, Result,
};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Control requests accepted by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TogglePlayPause,
    Play,
    Pause,
    /// Target position in milliseconds
    Seek(u64),
    ToggleQuality,
    Resize(RenderRect),
    Shutdown,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

/// Playback session owning one pipeline graph
pub struct PlaybackSession {
    /// Unique session ID
    id: SessionId,
    /// Session configuration
    config: PlayerConfig,
    graph: PipelineGraph,
    router: StreamRouter,
    quality: QualityController,
    /// Shared with the buffer probe
    metrics: SharedMetrics,
    telemetry: TelemetryEmitter,
    /// Control-side state, as last requested or forced by a status event
    state_tx: watch::Sender<PlaybackState>,
    position_tx: watch::Sender<PositionInfo>,
    label_tx: watch::Sender<ControlLabel>,
    probe_attached: bool,
    surface: Option<SurfaceBinder>,
    status_rx: mpsc::UnboundedReceiver<StatusEvent>,
    discovery_rx: mpsc::UnboundedReceiver<DiscoveredEndpoint>,
}

impl PlaybackSession {
    /// Create a session with the video sink chosen for the detected platform
    pub fn new(engine: Arc<dyn Engine>, source: &MediaSource, config: PlayerConfig) -> Result<Self> {
        let sinks = SinkSelector::new(Platform::detect(), config.video_sink.clone());
        Self::with_sinks(engine, source, config, sinks)
    }

    /// Create a session with an explicit sink selection.
    ///
    /// Fails if any required stage cannot be created or statically linked.
    #[instrument(skip_all, fields(location = source.effective_location()))]
    pub fn with_sinks(
        engine: Arc<dyn Engine>,
        source: &MediaSource,
        config: PlayerConfig,
        sinks: SinkSelector,
    ) -> Result<Self> {
        config.validate()?;
        engine.init()?;

        let id = SessionId::new();
        let graph = PipelineGraph::build(engine.clone(), source, &config, &sinks)?;
        let status_rx = engine.subscribe_status_events();
        let discovery_rx = engine.subscribe_stream_discovery(graph.topology().demuxer.id);

        let telemetry = TelemetryEmitter::new(id, config.telemetry_capacity);
        let metrics = MetricsCollector::shared(Some(telemetry.clone()));
        let (state_tx, _) = watch::channel(PlaybackState::Null);
        let (position_tx, _) = watch::channel(PositionInfo::default());
        let (label_tx, _) = watch::channel(ControlLabel::Play);

        info!(session_id = %id, engine = %engine.name(), "Playback session created");

        Ok(Self {
            id,
            quality: QualityController::new(config.reduced_resolution),
            config,
            graph,
            router: StreamRouter::new(),
            metrics,
            telemetry,
            state_tx,
            position_tx,
            label_tx,
            probe_attached: false,
            surface: None,
            status_rx,
            discovery_rx,
        })
    }

    /// Supply the render surface. The sink asks for it from the engine
    /// thread; implausible handles are skipped until the next request.
    pub fn attach_surface(&mut self, provider: Arc<dyn SurfaceProvider>) {
        let binder = SurfaceBinder::new(provider);
        let handler_binder = binder.clone();
        self.graph.engine().subscribe_surface_preparation(
            self.graph.topology().video_sink.id,
            Box::new(move || handler_binder.prepare_or_skip()),
        );
        self.surface = Some(binder);
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Get current control-side state
    pub fn state(&self) -> PlaybackState {
        *self.state_tx.borrow()
    }

    pub fn control_label(&self) -> ControlLabel {
        *self.label_tx.borrow()
    }

    pub fn quality_tier(&self) -> QualityTier {
        self.quality.tier()
    }

    /// Last published position
    pub fn position(&self) -> PositionInfo {
        *self.position_tx.borrow()
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    pub fn telemetry(&self) -> &TelemetryEmitter {
        &self.telemetry
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<PositionInfo> {
        self.position_tx.subscribe()
    }

    pub fn subscribe_label(&self) -> watch::Receiver<ControlLabel> {
        self.label_tx.subscribe()
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.telemetry.subscribe()
    }

    /// Record a control-side transition
    fn transition(&self, to: PlaybackState) {
        let from = self.state();
        if from == to {
            return;
        }
        self.state_tx.send_replace(to);
        info!(from = %from, to = %to, "State transition");
        self.telemetry.emit(TelemetryEvent::StateChange { from, to });
    }

    fn set_label(&self, label: ControlLabel) {
        self.label_tx.send_if_modified(|current| {
            let changed = *current != label;
            *current = label;
            changed
        });
    }

    /// Pause if playing, otherwise start playing
    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.state() == PlaybackState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Start playback. Rearms time-to-first-frame and clears the interval
    /// window. No-op while already playing.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn play(&mut self) -> Result<()> {
        if self.state() == PlaybackState::Playing {
            debug!("Already playing");
            return Ok(());
        }

        self.arm_frame_telemetry();
        self.graph.set_state(PlaybackState::Playing)?;
        self.set_label(ControlLabel::Pause);
        self.transition(PlaybackState::Playing);
        Ok(())
    }

    /// Pause playback
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn pause(&mut self) -> Result<()> {
        if self.state() == PlaybackState::Paused {
            return Ok(());
        }
        self.graph.set_state(PlaybackState::Paused)?;
        self.set_label(ControlLabel::Play);
        self.transition(PlaybackState::Paused);
        Ok(())
    }

    /// Flushing seek to the nearest sync point at or before `target_ms`.
    /// Frame telemetry restarts as for a fresh play.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn seek(&mut self, target_ms: u64) -> Result<()> {
        let target = Duration::from_millis(target_ms);
        info!(target_ms, "Seeking");
        self.graph.engine().seek(target, SeekFlags::FLUSH_KEY_UNIT)?;
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        Ok(())
    }

    /// Flip the quality tier. Leaves the graph Playing; coming from any
    /// other state this counts as a fresh play for frame telemetry.
    pub fn toggle_quality(&mut self) -> Result<QualityTier> {
        if self.state() != PlaybackState::Playing {
            self.arm_frame_telemetry();
        }
        let before = self.quality.tier();
        let tier = self.quality.toggle(&self.graph)?;
        if tier != before {
            self.telemetry.emit(TelemetryEvent::QualityChange { tier });
        }
        self.set_label(ControlLabel::Pause);
        self.transition(PlaybackState::Playing);
        Ok(tier)
    }

    /// Move the video within its surface
    pub fn resize(&mut self, rect: RenderRect) {
        debug!(?rect, "Render rectangle changed");
        self.graph
            .engine()
            .set_render_rectangle(self.graph.topology().video_sink.id, rect);
    }

    /// Query position and duration and publish them. Returns `None`, and
    /// publishes nothing, unless both are known.
    pub fn poll_position(&mut self) -> Option<PositionInfo> {
        let engine = self.graph.engine();
        let duration = engine.query_duration().filter(|d| !d.is_zero())?;
        let position = engine.query_position()?.min(duration);

        let info = PositionInfo {
            position_ms: position.as_millis() as u64,
            duration_ms: Some(duration.as_millis() as u64),
        };
        self.position_tx.send_if_modified(|current| {
            let changed = *current != info;
            *current = info;
            changed
        });
        Some(info)
    }

    /// React to an engine status event. Errors and end of stream both
    /// park the graph in Ready with the control showing Play.
    pub fn handle_status(&mut self, event: StatusEvent) {
        match &event {
            StatusEvent::Error(message) => {
                let err = Error::EngineRuntime(message.clone());
                error!(error = %err, "Engine error");
                self.telemetry.emit(TelemetryEvent::Error {
                    code: err.error_code().to_string(),
                    message: message.clone(),
                });
            }
            StatusEvent::EndOfStream => {
                info!("End of stream");
                self.telemetry.emit(TelemetryEvent::EndOfStream);
            }
        }

        if let Err(e) = self.graph.set_state(PlaybackState::Ready) {
            warn!(error = %e, "Failed to park graph in Ready");
        }
        self.set_label(ControlLabel::Play);
        self.transition(PlaybackState::Ready);
    }

    /// Route one stream the demuxer exposed
    pub fn on_stream_discovered(&mut self, discovered: DiscoveredEndpoint) -> RouteOutcome {
        self.router.on_stream_discovered(&mut self.graph, &discovered)
    }

    /// Route every stream discovered so far, in discovery order
    pub fn route_pending(&mut self) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(discovered) = self.discovery_rx.try_recv() {
            outcomes.push(self.on_stream_discovered(discovered));
        }
        outcomes
    }

    /// Handle every notification already queued by the engine, without
    /// waiting. Returns how many were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = self.route_pending().len();
        while let Ok(event) = self.status_rx.try_recv() {
            self.handle_status(event);
            handled += 1;
        }
        handled
    }

    /// Clear the interval window, rearm time-to-first-frame and make sure
    /// the frame probe is in place
    fn arm_frame_telemetry(&mut self) {
        {
            let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            metrics.reset();
            metrics.clear_last_timestamp();
        }
        if let Err(e) = self.ensure_probe() {
            warn!(error = %e, "Frame probe unavailable, playing without frame telemetry");
        }
    }

    /// Attach the frame probe to the video sink input, once per session
    fn ensure_probe(&mut self) -> Result<()> {
        if self.probe_attached {
            return Ok(());
        }
        let metrics = self.metrics.clone();
        let endpoint = self.graph.topology().video_sink.input();
        self.graph.engine().attach_buffer_probe(
            &endpoint,
            Box::new(move |pts| {
                metrics
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_frame(pts);
            }),
        )?;
        self.probe_attached = true;
        debug!(endpoint = %endpoint, "Frame probe attached");
        Ok(())
    }

    /// Stop the graph and release every stage
    pub fn close(&mut self) {
        self.graph.teardown();
        self.set_label(ControlLabel::Play);
        self.transition(PlaybackState::Null);
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Seek(ms) => self.seek(ms),
            Command::ToggleQuality => self.toggle_quality().map(|_| ()),
            Command::Resize(rect) => {
                self.resize(rect);
                Ok(())
            }
            Command::Shutdown => {
                self.close();
                Ok(())
            }
        }
    }

    /// Move the session onto its own task and return a handle to it
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::channel(self.config.command_capacity);
        let handle = SessionHandle {
            id: self.id,
            tx,
            state_rx: self.subscribe_state(),
            position_rx: self.subscribe_position(),
            label_rx: self.subscribe_label(),
            telemetry: self.telemetry.clone(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.position_poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(session_id = %self.id, "Session loop started");
        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        debug!("All handles dropped");
                        break;
                    };
                    let shutdown = command == Command::Shutdown;
                    let result = self.execute(command);
                    if let Err(ref e) = result {
                        warn!(error = %e, "Command failed");
                    }
                    let _ = reply.send(result);
                    if shutdown {
                        break;
                    }
                }
                Some(discovered) = self.discovery_rx.recv() => {
                    self.on_stream_discovered(discovered);
                }
                Some(event) = self.status_rx.recv() => {
                    self.handle_status(event);
                }
                _ = ticker.tick() => {
                    self.poll_position();
                }
            }
        }

        self.close();
        info!(session_id = %self.id, "Session loop stopped");
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<Request>,
    state_rx: watch::Receiver<PlaybackState>,
    position_rx: watch::Receiver<PositionInfo>,
    label_rx: watch::Receiver<ControlLabel>,
    telemetry: TelemetryEmitter,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Send a command and wait for the session to apply it
    pub async fn send(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { command, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        self.send(Command::TogglePlayPause).await
    }

    pub async fn seek(&self, target_ms: u64) -> Result<()> {
        self.send(Command::Seek(target_ms)).await
    }

    pub async fn toggle_quality(&self) -> Result<()> {
        self.send(Command::ToggleQuality).await
    }

    pub async fn resize(&self, rect: RenderRect) -> Result<()> {
        self.send(Command::Resize(rect)).await
    }

    /// Tear the session down. Later commands fail with `SessionClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    pub fn control_label(&self) -> ControlLabel {
        *self.label_rx.borrow()
    }

    /// Last published position; 0 until the duration is known
    pub fn current_position_ms(&self) -> u64 {
        self.position_rx.borrow().position_ms
    }

    pub fn current_duration_ms(&self) -> Option<u64> {
        self.position_rx.borrow().duration_ms
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<PositionInfo> {
        self.position_rx.clone()
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.telemetry.subscribe()
    }
}

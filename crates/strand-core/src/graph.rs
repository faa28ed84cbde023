//! Pipeline graph
//!
//! Owns every stage of one playback session and the dynamic links created
//! while streams are discovered. The fixed part of the topology is:
//!
//! ```text
//! source ──▶ demux ─┬─▶ [decryptor] ─┐
//!                   │                ▼
//!                   ├─▶ qv ─▶ vconv ─▶ vscale ─▶ vcaps ─▶ vsink
//!                   └─▶ qa ─▶ aconv ─▶ ares ─▶ asink
//! ```
//!
//! Demuxer outputs are linked later by the stream router. Stages are
//! released in reverse construction order when the graph is torn down.

use crate::{
    config::{MediaSource, PlayerConfig},
    engine::{Engine, PropertyValue, StateTarget, INPUT_ENDPOINT, OUTPUT_ENDPOINT},
    sink::SinkSelector,
    types::*,
    Error, Result,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// A stage owned by the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHandle {
    pub id: StageId,
    pub kind: StageKind,
    pub name: String,
    pub factory: String,
}

impl StageHandle {
    pub fn input(&self) -> Endpoint {
        Endpoint::input(self.id, &self.name, INPUT_ENDPOINT)
    }

    pub fn output(&self) -> Endpoint {
        Endpoint::output(self.id, &self.name, OUTPUT_ENDPOINT)
    }
}

/// Stages the orchestration logic addresses by role
#[derive(Debug, Clone)]
pub struct Topology {
    pub source: StageHandle,
    pub demuxer: StageHandle,
    pub video_queue: StageHandle,
    pub video_scaler: StageHandle,
    pub video_filter: StageHandle,
    pub video_sink: StageHandle,
    pub audio_queue: StageHandle,
    pub decryptor: Option<StageHandle>,
}

impl Topology {
    /// Input of the branch a stream kind feeds
    pub fn branch_input(&self, kind: StreamKind) -> Option<Endpoint> {
        match kind {
            StreamKind::Video => Some(self.video_queue.input()),
            StreamKind::Audio => Some(self.audio_queue.input()),
            StreamKind::Unknown => None,
        }
    }
}

/// The stages and links of one playback session
pub struct PipelineGraph {
    engine: Arc<dyn Engine>,
    /// Construction order
    stages: Vec<StageHandle>,
    links: Vec<Link>,
    topology: Topology,
    decryptor_ready: bool,
    torn_down: bool,
}

/// Stages created so far during [`PipelineGraph::build`]. Released if the
/// build fails before the graph takes ownership.
struct GraphBuilder {
    engine: Arc<dyn Engine>,
    stages: Vec<StageHandle>,
}

impl GraphBuilder {
    fn create(&mut self, kind: StageKind, factory: &str, name: &str) -> Result<StageHandle> {
        match self.engine.create_stage(kind, factory, name) {
            Some(id) => Ok(self.adopt(StageHandle {
                id,
                kind,
                name: name.to_string(),
                factory: factory.to_string(),
            })),
            None => {
                error!(factory, name, "Failed to create stage");
                Err(Error::ElementCreation {
                    factory: factory.to_string(),
                    name: name.to_string(),
                })
            }
        }
    }

    fn adopt(&mut self, stage: StageHandle) -> StageHandle {
        debug!(stage = %stage.name, factory = %stage.factory, kind = %stage.kind, "Stage created");
        self.stages.push(stage.clone());
        stage
    }

    fn link_chain(&self, chain: &[&StageHandle]) -> Result<()> {
        for pair in chain.windows(2) {
            self.engine.link_stages(pair[0].id, pair[1].id).inspect_err(|e| {
                error!(from = %pair[0].name, to = %pair[1].name, error = %e, "Static link failed");
            })?;
        }
        Ok(())
    }

    fn finish(mut self, topology: Topology) -> PipelineGraph {
        PipelineGraph {
            engine: self.engine.clone(),
            stages: std::mem::take(&mut self.stages),
            links: Vec::new(),
            topology,
            decryptor_ready: false,
            torn_down: false,
        }
    }
}

impl Drop for GraphBuilder {
    fn drop(&mut self) {
        for stage in self.stages.drain(..).rev() {
            debug!(stage = %stage.name, "Releasing stage of incomplete graph");
            self.engine.release(stage.id);
        }
    }
}

impl PipelineGraph {
    /// Construct and statically link the full topology.
    ///
    /// Any required stage that cannot be created, or any static link that
    /// fails, aborts startup. Stages created before the failure are
    /// released again.
    #[instrument(skip_all, fields(location = source.effective_location()))]
    pub fn build(
        engine: Arc<dyn Engine>,
        source: &MediaSource,
        config: &PlayerConfig,
        sinks: &SinkSelector,
    ) -> Result<Self> {
        let mut builder = GraphBuilder {
            engine,
            stages: Vec::new(),
        };

        let src = builder.create(StageKind::Source, "filesrc", "src")?;
        builder.engine.set_property(
            src.id,
            "location",
            PropertyValue::Text(source.effective_location().to_string()),
        )?;
        let demuxer = builder.create(StageKind::Demultiplexer, "decodebin", "dbin")?;

        // Video branch
        let video_queue = builder.create(StageKind::Queue, "queue", "qv")?;
        let video_convert = builder.create(StageKind::Converter, "videoconvert", "vconv")?;
        let video_scaler = builder.create(StageKind::Scaler, "videoscale", "vscale")?;
        let video_filter = builder.create(StageKind::ConstraintFilter, "capsfilter", "vcaps")?;
        let (sink_id, sink_factory) = sinks.create(builder.engine.as_ref(), "vsink")?;
        let video_sink = builder.adopt(StageHandle {
            id: sink_id,
            kind: StageKind::Sink,
            name: "vsink".to_string(),
            factory: sink_factory,
        });

        // Audio branch
        let audio_queue = builder.create(StageKind::Queue, "queue", "qa")?;
        let audio_convert = builder.create(StageKind::Converter, "audioconvert", "aconv")?;
        let audio_resample = builder.create(StageKind::Resampler, "audioresample", "ares")?;
        let audio_sink = builder.create(StageKind::Sink, "autoaudiosink", "asink")?;

        // Optional decryptor
        let decryptor = match config.decryptor.as_deref() {
            Some(factory) => match builder.engine.create_stage(StageKind::Decryptor, factory, "decrypt") {
                Some(id) => Some(builder.adopt(StageHandle {
                    id,
                    kind: StageKind::Decryptor,
                    name: "decrypt".to_string(),
                    factory: factory.to_string(),
                })),
                None => {
                    warn!(factory, "Decryptor unavailable, protected streams will route directly");
                    None
                }
            },
            None => None,
        };

        let ids: Vec<StageId> = builder.stages.iter().map(|s| s.id).collect();
        builder.engine.add_to_graph(&ids)?;

        builder.link_chain(&[&src, &demuxer])?;
        builder.link_chain(&[&video_queue, &video_convert, &video_scaler, &video_filter, &video_sink])?;
        builder.link_chain(&[&audio_queue, &audio_convert, &audio_resample, &audio_sink])?;

        info!(
            stages = builder.stages.len(),
            decryptor = decryptor.is_some(),
            "Pipeline graph built"
        );

        Ok(builder.finish(Topology {
            source: src,
            demuxer,
            video_queue,
            video_scaler,
            video_filter,
            video_sink,
            audio_queue,
            decryptor,
        }))
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Role-addressed stages
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Output currently linked into `input`
    pub fn peer_of(&self, input: &Endpoint) -> Option<&Endpoint> {
        self.links
            .iter()
            .find(|l| l.status == LinkStatus::Linked && &l.input == input)
            .map(|l| &l.output)
    }

    /// Number of live links into `input`. Never more than one.
    pub fn links_into(&self, input: &Endpoint) -> usize {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Linked && &l.input == input)
            .count()
    }

    /// Link `output` to `input`. An input that already has a link is left
    /// untouched and reported as [`LinkOutcome::AlreadyLinked`].
    pub fn link(&mut self, output: &Endpoint, input: &Endpoint) -> LinkOutcome {
        if self.peer_of(input).is_some() {
            debug!(from = %output, to = %input, "Input already linked");
            return LinkOutcome::AlreadyLinked;
        }

        let outcome = self.engine.link(output, input);
        let status = match &outcome {
            LinkOutcome::Linked => {
                debug!(from = %output, to = %input, "Linked");
                LinkStatus::Linked
            }
            LinkOutcome::AlreadyLinked => {
                debug!(from = %output, to = %input, "Engine reports input already linked");
                return outcome;
            }
            LinkOutcome::Failed(code) => {
                warn!(from = %output, to = %input, code = %code, "Link failed");
                LinkStatus::Unlinked
            }
        };
        self.links.push(Link {
            output: output.clone(),
            input: input.clone(),
            status,
        });
        outcome
    }

    /// Undo a live link so `output` can be linked elsewhere. The record is
    /// kept, marked [`LinkStatus::Unlinked`].
    pub fn unlink(&mut self, output: &Endpoint, input: &Endpoint) -> bool {
        let Some(link) = self.links.iter_mut().find(|l| {
            l.status == LinkStatus::Linked && &l.output == output && &l.input == input
        }) else {
            return false;
        };
        if !self.engine.unlink(output, input) {
            warn!(from = %output, to = %input, "Engine refused unlink");
            return false;
        }
        link.status = LinkStatus::Unlinked;
        debug!(from = %output, to = %input, "Unlinked");
        true
    }

    /// Bring the decryptor to Ready ahead of linking. Idempotent.
    pub fn ensure_decryptor_ready(&mut self) -> Result<()> {
        if self.decryptor_ready {
            return Ok(());
        }
        let Some(decryptor) = self.topology.decryptor.as_ref().map(|d| d.id) else {
            return Ok(());
        };
        self.engine
            .set_state(StateTarget::Stage(decryptor), PlaybackState::Ready)?;
        self.decryptor_ready = true;
        Ok(())
    }

    /// Request a graph-wide state change
    pub fn set_state(&self, state: PlaybackState) -> Result<()> {
        self.engine.set_state(StateTarget::Graph, state)
    }

    pub fn current_state(&self) -> PlaybackState {
        self.engine.current_state()
    }

    /// Set the graph to Null and release every stage, newest first
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(e) = self.engine.set_state(StateTarget::Graph, PlaybackState::Null) {
            warn!(error = %e, "Failed to stop graph during teardown");
        }
        for stage in self.stages.drain(..).rev() {
            debug!(stage = %stage.name, "Releasing stage");
            self.engine.release(stage.id);
        }
        self.links.clear();
        info!("Pipeline graph torn down");
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        self.teardown();
    }
}

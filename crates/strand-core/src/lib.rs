//! Strand Core - Playback orchestration for graph-based media engines
//!
//! This crate drives an external media engine through the [`Engine`] trait:
//! - Pipeline graph construction and teardown
//! - Dynamic routing of discovered streams, with an optional decryptor
//! - Quality tier toggling through a dimension constraint
//! - Time-to-first-frame and frame-interval percentiles
//! - Play/pause/seek state machine and position publication
//! - Render-surface preparation and video sink selection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Strand Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Stream    │  │   Quality    │  │   Metrics    │           │
//! │  │    Router    │  │  Controller  │  │  Collector   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │  Telemetry   │  │  Pipeline   │  │   Surface    │            │
//! │  │   Emitter    │  │    Graph    │  │    Binder    │            │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘            │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Engine    │  (GStreamer, sim)            │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod engine;
pub mod graph;
pub mod sink;
pub mod surface;
pub mod router;
pub mod quality;
pub mod metrics;
pub mod analytics;
pub mod session;
pub mod sim;

pub use error::{Error, Result};
pub use types::*;
pub use config::{MediaSource, PlayerConfig};
pub use engine::{Engine, PropertyValue, SeekFlags, StateTarget};
pub use graph::{PipelineGraph, StageHandle, Topology};
pub use sink::{Platform, SinkSelector};
pub use surface::{SurfaceAssignment, SurfaceBinder, SurfaceProvider};
pub use router::{RouteOutcome, StreamRouter};
pub use quality::QualityController;
pub use metrics::{percentile, MetricsCollector, SharedMetrics};
pub use analytics::{TelemetryEmitter, TelemetryEvent, TelemetryRecord};
pub use session::{Command, PlaybackSession, SessionHandle};
pub use sim::SimEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version once at startup
pub fn init() {
    tracing::info!(version = VERSION, "Strand Core initialized");
}

//! Telemetry event emission
//!
//! Records carry a unique id, a wall-clock timestamp and a sequence number,
//! and are published on a broadcast channel. Publishing never blocks, so
//! the emitter may be used from the engine's streaming thread.

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Telemetry event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Wall-clock time from play request to first presented frame
    FirstFrame {
        ttff_ms: f64,
    },

    /// Frame interval percentiles over the current window
    FrameIntervals {
        p50_ms: i64,
        p95_ms: i64,
        samples: usize,
    },

    /// Control-side state transition
    StateChange {
        from: PlaybackState,
        to: PlaybackState,
    },

    /// Engine-reported error
    Error {
        code: String,
        message: String,
    },

    /// Playback reached the end of the media
    EndOfStream,

    /// Quality tier switched
    QualityChange {
        tier: QualityTier,
    },
}

/// Telemetry event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Session ID
    pub session_id: SessionId,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    /// The event
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

/// Telemetry emitter. Cheap to clone; clones share the sequence counter.
#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    session_id: SessionId,
    sequence: Arc<AtomicU64>,
    tx: broadcast::Sender<TelemetryRecord>,
}

impl TelemetryEmitter {
    /// Create an emitter buffering up to `capacity` records per subscriber
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            session_id,
            sequence: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    /// Publish an event. Dropped silently when nobody subscribes.
    pub fn emit(&self, event: TelemetryEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let record = TelemetryRecord {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence,
            event,
        };
        trace!(sequence, event = ?record.event, "Telemetry event");
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.tx.subscribe()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Number of events emitted so far
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_telemetry_emitter() {
        let emitter = TelemetryEmitter::new(SessionId::new(), 16);
        let mut rx = emitter.subscribe();

        emitter.emit(TelemetryEvent::FirstFrame { ttff_ms: 42.0 });
        emitter.clone().emit(TelemetryEvent::EndOfStream);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.event, TelemetryEvent::EndOfStream);
        assert_eq!(emitter.emitted(), 2);
    }

    #[test]
    fn test_late_subscriber_sees_only_new_records() {
        let emitter = TelemetryEmitter::new(SessionId::new(), 8);
        emitter.emit(TelemetryEvent::EndOfStream);
        let mut rx = emitter.subscribe();
        emitter.emit(TelemetryEvent::FirstFrame { ttff_ms: 5.0 });

        let record = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(record.sequence, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = TelemetryEmitter::new(SessionId::new(), 4);
        emitter.emit(TelemetryEvent::QualityChange { tier: QualityTier::Reduced });
        assert_eq!(emitter.emitted(), 1);
    }

    #[test]
    fn test_record_json_is_flat() {
        let record = TelemetryRecord {
            id: Uuid::new_v4(),
            session_id: SessionId::new(),
            timestamp: Utc::now(),
            sequence: 7,
            event: TelemetryEvent::FrameIntervals {
                p50_ms: 33,
                p95_ms: 41,
                samples: 60,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "frame_intervals");
        assert_eq!(json["p95_ms"], 41);
        assert_eq!(json["sequence"], 7);
    }
}

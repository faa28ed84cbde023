//! Output formatting for CLI

use serde::Serialize;
use strand_core::{PositionInfo, TelemetryEvent, TelemetryRecord};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Serialize `data` as one JSON line
pub fn json_line<T: Serialize>(data: &T) -> String {
    serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
}

/// One line per telemetry record
pub fn format_record(record: &TelemetryRecord, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return json_line(record);
    }

    let detail = match &record.event {
        TelemetryEvent::FirstFrame { ttff_ms } => format!("first frame after {:.1} ms", ttff_ms),
        TelemetryEvent::FrameIntervals { p50_ms, p95_ms, samples } => {
            format!("frame interval p50={} ms p95={} ms ({} samples)", p50_ms, p95_ms, samples)
        }
        TelemetryEvent::StateChange { from, to } => format!("state {} -> {}", from, to),
        TelemetryEvent::Error { code, message } => format!("error [{}] {}", code, message),
        TelemetryEvent::EndOfStream => "end of stream".to_string(),
        TelemetryEvent::QualityChange { tier } => format!("quality tier {}", tier),
    };
    format!(
        "[{:>4}] {} {}",
        record.sequence,
        record.timestamp.format("%H:%M:%S%.3f"),
        detail
    )
}

/// `mm:ss / mm:ss`
pub fn format_position(info: &PositionInfo) -> String {
    fn clock(ms: u64) -> String {
        let secs = ms / 1000;
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
    match info.duration_ms {
        Some(duration) => format!("{} / {}", clock(info.position_ms), clock(duration)),
        None => "--:-- / --:--".to_string(),
    }
}

//! Frame-interval telemetry
//!
//! Fed from the engine's streaming thread through a buffer probe on the
//! video sink input. Work per frame is an amortized append; the window is
//! trimmed in bulk and percentiles are computed once every
//! [`PERCENTILE_EVERY`] samples.

use crate::{
    analytics::{TelemetryEmitter, TelemetryEvent},
    types::FrameSample,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Window length that triggers a trim
pub const WINDOW_CEILING: usize = 1200;
/// Window length left after a trim
pub const WINDOW_RETAIN: usize = 1000;
/// Samples between two percentile reports
pub const PERCENTILE_EVERY: u64 = 60;

/// Collector shared between the control loop and the streaming thread
pub type SharedMetrics = Arc<Mutex<MetricsCollector>>;

/// Order statistic at percentile `p` (0-100): the element at index
/// `floor(p / 100 * (n - 1))` of the sorted order.
///
/// Works on its own copy of `samples`, since selection reorders its input.
pub fn percentile(samples: &[i64], p: f64) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let mut scratch = samples.to_vec();
    let p = p.clamp(0.0, 100.0);
    let index = ((p / 100.0) * (scratch.len() - 1) as f64).floor() as usize;
    let (_, value, _) = scratch.select_nth_unstable(index);
    Some(*value)
}

/// FIFO of frame samples with bulk trimming
#[derive(Debug, Default)]
pub struct MetricsWindow {
    samples: VecDeque<FrameSample>,
}

impl MetricsWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_CEILING + 1),
        }
    }

    /// Append a sample. Once the ceiling is crossed the oldest samples are
    /// dropped in arrival order, leaving [`WINDOW_RETAIN`]. Returns whether
    /// a trim happened.
    pub fn push(&mut self, sample: FrameSample) -> bool {
        self.samples.push_back(sample);
        if self.samples.len() > WINDOW_CEILING {
            let excess = self.samples.len() - WINDOW_RETAIN;
            self.samples.drain(..excess);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Intervals in arrival order
    pub fn snapshot(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.interval_ms).collect()
    }
}

/// Percentile pair over the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePercentiles {
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub samples: usize,
}

/// Time-to-first-frame and frame-interval statistics
#[derive(Debug)]
pub struct MetricsCollector {
    window: MetricsWindow,
    frame_count: u64,
    last_timestamp_ms: Option<i64>,
    /// Set by `reset`, consumed by the first frame
    armed_at: Option<Instant>,
    last_ttff: Option<Duration>,
    last_percentiles: Option<FramePercentiles>,
    emitter: Option<TelemetryEmitter>,
}

impl MetricsCollector {
    pub fn new(emitter: Option<TelemetryEmitter>) -> Self {
        Self {
            window: MetricsWindow::new(),
            frame_count: 0,
            last_timestamp_ms: None,
            armed_at: None,
            last_ttff: None,
            last_percentiles: None,
            emitter,
        }
    }

    pub fn shared(emitter: Option<TelemetryEmitter>) -> SharedMetrics {
        Arc::new(Mutex::new(Self::new(emitter)))
    }

    /// Clear the window and counters and arm the first-frame stopwatch.
    /// Called on every transition into Playing and on every seek.
    pub fn reset(&mut self) {
        self.window.clear();
        self.frame_count = 0;
        self.last_timestamp_ms = None;
        self.armed_at = Some(Instant::now());
        debug!("Frame metrics reset");
    }

    /// Forget the last timestamp without disarming
    pub fn clear_last_timestamp(&mut self) {
        self.last_timestamp_ms = None;
    }

    /// Report time to first frame if armed. One report per arming.
    pub fn on_first_frame(&mut self) -> Option<Duration> {
        let armed_at = self.armed_at.take()?;
        let ttff = armed_at.elapsed();
        self.last_ttff = Some(ttff);
        debug!(ttff_ms = ttff.as_millis() as u64, "First frame");
        self.emit(TelemetryEvent::FirstFrame {
            ttff_ms: ttff.as_secs_f64() * 1000.0,
        });
        Some(ttff)
    }

    /// Record one presented frame
    pub fn on_frame(&mut self, timestamp: Option<Duration>) {
        if self.armed_at.is_some() {
            self.on_first_frame();
        }

        let Some(timestamp) = timestamp else {
            return;
        };
        let timestamp_ms = timestamp.as_millis() as i64;
        let Some(last_ms) = self.last_timestamp_ms.replace(timestamp_ms) else {
            return;
        };

        let interval_ms = timestamp_ms - last_ms;
        if interval_ms <= 0 {
            trace!(interval_ms, "Timestamp did not advance");
            return;
        }

        self.window.push(FrameSample { interval_ms });
        self.frame_count += 1;

        if self.frame_count % PERCENTILE_EVERY == 0 {
            self.report_percentiles();
        }
    }

    fn report_percentiles(&mut self) {
        let snapshot = self.window.snapshot();
        let (Some(p50_ms), Some(p95_ms)) = (percentile(&snapshot, 50.0), percentile(&snapshot, 95.0))
        else {
            return;
        };
        let stats = FramePercentiles {
            p50_ms,
            p95_ms,
            samples: snapshot.len(),
        };
        debug!(p50_ms, p95_ms, samples = stats.samples, "Frame interval percentiles");
        self.last_percentiles = Some(stats);
        self.emit(TelemetryEvent::FrameIntervals {
            p50_ms,
            p95_ms,
            samples: stats.samples,
        });
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(ref emitter) = self.emitter {
            emitter.emit(event);
        }
    }

    pub fn window(&self) -> &MetricsWindow {
        &self.window
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn last_ttff(&self) -> Option<Duration> {
        self.last_ttff
    }

    pub fn last_percentiles(&self) -> Option<FramePercentiles> {
        self.last_percentiles
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    #[test]
    fn test_percentile_constant_set() {
        let samples = vec![33; 120];
        assert_eq!(percentile(&samples, 50.0), Some(33));
        assert_eq!(percentile(&samples, 95.0), Some(33));
    }

    #[test]
    fn test_percentile_index() {
        let samples: Vec<i64> = (0..100).collect();
        // floor(0.5 * 99) = 49, floor(0.95 * 99) = 94
        assert_eq!(percentile(&samples, 50.0), Some(49));
        assert_eq!(percentile(&samples, 95.0), Some(94));

        let shuffled = vec![9, 1, 8, 2, 7, 3, 6, 4, 5, 0];
        assert_eq!(percentile(&shuffled, 50.0), Some(4));
        assert_eq!(percentile(&shuffled, 95.0), Some(8));
        assert_eq!(shuffled[0], 9, "input must not be reordered");
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_window_trims_oldest() {
        let mut window = MetricsWindow::new();
        for i in 0..WINDOW_CEILING as i64 {
            assert!(!window.push(FrameSample { interval_ms: i }));
        }
        assert_eq!(window.len(), WINDOW_CEILING);

        assert!(window.push(FrameSample { interval_ms: 1200 }));
        assert!(window.len() <= WINDOW_RETAIN);

        let snapshot = window.snapshot();
        assert_eq!(snapshot.first(), Some(&201));
        assert_eq!(snapshot.last(), Some(&1200));
        assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ttff_once_per_arm() {
        let mut metrics = MetricsCollector::default();
        metrics.on_frame(ms(0));
        assert!(metrics.last_ttff().is_none(), "not armed yet");

        metrics.reset();
        assert!(metrics.is_armed());
        metrics.on_frame(ms(0));
        assert!(metrics.last_ttff().is_some());
        assert!(!metrics.is_armed());
        assert!(metrics.on_first_frame().is_none());
    }

    #[test]
    fn test_non_advancing_timestamp_discarded() {
        let mut metrics = MetricsCollector::default();
        metrics.reset();
        metrics.on_frame(ms(100));
        metrics.on_frame(ms(133));
        metrics.on_frame(ms(133));
        metrics.on_frame(ms(120));
        // last timestamp moved back to 120, so 150 yields a 30ms sample
        metrics.on_frame(ms(150));
        assert_eq!(metrics.frame_count(), 2);
        assert_eq!(metrics.window().snapshot(), vec![33, 30]);
    }

    #[test]
    fn test_missing_timestamp_ignored() {
        let mut metrics = MetricsCollector::default();
        metrics.on_frame(ms(0));
        metrics.on_frame(None);
        metrics.on_frame(ms(40));
        assert_eq!(metrics.window().snapshot(), vec![40]);
    }

    #[test]
    fn test_percentiles_every_sixty_frames() {
        let mut metrics = MetricsCollector::default();
        metrics.reset();
        for i in 0..60 {
            metrics.on_frame(ms(i * 40));
        }
        // 60 timestamps give 59 intervals
        assert!(metrics.last_percentiles().is_none());

        metrics.on_frame(ms(60 * 40));
        let stats = metrics.last_percentiles().unwrap();
        assert_eq!(stats.p50_ms, 40);
        assert_eq!(stats.p95_ms, 40);
        assert_eq!(stats.samples, 60);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut metrics = MetricsCollector::default();
        for i in 0..10 {
            metrics.on_frame(ms(i * 20));
        }
        assert_eq!(metrics.window().len(), 9);
        metrics.reset();
        assert!(metrics.window().is_empty());
        assert_eq!(metrics.frame_count(), 0);
    }
}

//! Rolling metrics and error history
//!
//! Passive observation only: nothing here influences control flow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Samples kept per rolling window
pub const WINDOW_CAPACITY: usize = 100;

/// Error history entries kept
pub const ERROR_HISTORY_CAPACITY: usize = 20;

/// Age after which error history entries are discarded
pub const ERROR_HISTORY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Fixed-capacity window of the most recent samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Add a sample, discarding the oldest when full
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Mean of the window (0.0 when empty)
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Largest sample (0.0 when empty)
    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Summary of a rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowSummary {
    pub samples: usize,
    pub average: f64,
    pub max: f64,
}

impl From<&RollingWindow> for WindowSummary {
    fn from(window: &RollingWindow) -> Self {
        Self {
            samples: window.len(),
            average: window.average(),
            max: window.max(),
        }
    }
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Decode latency in milliseconds
    pub decode_time_ms: WindowSummary,
    /// Queue size sampled on every scheduler tick
    pub queue_size: WindowSummary,
    /// Inter-chunk arrival latency in milliseconds
    pub chunk_latency_ms: WindowSummary,
    pub processed: u64,
    pub dropped: u64,
    pub drop_rate: f64,
}

/// Rolling stream metrics
#[derive(Debug)]
pub struct Metrics {
    decode_times: RollingWindow,
    queue_sizes: RollingWindow,
    latencies: RollingWindow,
    processed: u64,
    dropped: u64,
    last_arrival: Option<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            decode_times: RollingWindow::new(WINDOW_CAPACITY),
            queue_sizes: RollingWindow::new(WINDOW_CAPACITY),
            latencies: RollingWindow::new(WINDOW_CAPACITY),
            processed: 0,
            dropped: 0,
            last_arrival: None,
        }
    }

    /// Record a chunk arrival; the gap since the previous arrival becomes a
    /// latency sample
    pub fn record_arrival(&mut self, at: Instant) {
        if let Some(previous) = self.last_arrival {
            let gap = at.saturating_duration_since(previous);
            self.latencies
                .push(lsap_common::time::duration_to_millis_f64(gap));
        }
        self.last_arrival = Some(at);
    }

    pub fn record_decode_time(&mut self, elapsed: Duration) {
        self.decode_times
            .push(lsap_common::time::duration_to_millis_f64(elapsed));
    }

    pub fn record_queue_size(&mut self, size: usize) {
        self.queue_sizes.push(size as f64);
    }

    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// dropped / (processed + dropped), 0.0 before any chunk
    pub fn drop_rate(&self) -> f64 {
        let total = self.processed + self.dropped;
        if total == 0 {
            return 0.0;
        }
        self.dropped as f64 / total as f64
    }

    /// Average inter-chunk latency in milliseconds
    pub fn average_latency_ms(&self) -> f64 {
        self.latencies.average()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decode_time_ms: (&self.decode_times).into(),
            queue_size: (&self.queue_sizes).into(),
            chunk_latency_ms: (&self.latencies).into(),
            processed: self.processed,
            dropped: self.dropped,
            drop_rate: self.drop_rate(),
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip)]
    recorded_at: Instant,
}

/// Recent failures: at most 20, none older than 5 minutes
#[derive(Debug, Default)]
pub struct ErrorHistory {
    entries: VecDeque<ErrorRecord>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: &str, message: &str, recoverable: bool) {
        let now = Instant::now();
        self.prune(now);
        if self.entries.len() == ERROR_HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ErrorRecord {
            timestamp: lsap_common::time::now(),
            operation: operation.to_string(),
            message: message.to_string(),
            recoverable,
            recorded_at: now,
        });
    }

    /// Entries still inside the history window, oldest first
    pub fn recent(&self) -> Vec<ErrorRecord> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| now.saturating_duration_since(e.recorded_at) <= ERROR_HISTORY_WINDOW)
            .cloned()
            .collect()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.recorded_at) > ERROR_HISTORY_WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

//! Health assessment and quality scoring
//!
//! Pure functions over a snapshot of engine state; the engine gathers the
//! inputs and [`HealthReport::assemble`] turns them into the host-facing
//! report.

use crate::audio::output::DeviceState;
use crate::playback::buffer_pool::PoolStats;
use crate::playback::queue::PlaybackQueue;
use crate::telemetry::metrics::{ErrorRecord, MetricsSnapshot};
use chrono::{DateTime, Utc};
use lsap_common::events::{HealthState, HealthStatus, QualityBand};
use serde::Serialize;

/// Drop rate above which the stream is considered lossy
pub const DROP_RATE_THRESHOLD: f64 = 0.10;

/// Queue fill ratio above which the queue is considered nearly full
pub const QUEUE_FULL_THRESHOLD: f64 = 0.90;

/// Estimated-memory ratio above which memory pressure is reported
pub const MEMORY_PRESSURE_THRESHOLD: f64 = 0.90;

/// A detected health problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    DeviceInactive,
    HighDropRate,
    MemoryPressure,
    QueueNearlyFull,
}

/// Detect issues from current conditions
pub fn assess_issues(
    device_state: DeviceState,
    drop_rate: f64,
    memory_pressure: bool,
    queue_occupancy: f64,
) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    if device_state != DeviceState::Active {
        issues.push(HealthIssue::DeviceInactive);
    }
    if drop_rate > DROP_RATE_THRESHOLD {
        issues.push(HealthIssue::HighDropRate);
    }
    if memory_pressure {
        issues.push(HealthIssue::MemoryPressure);
    }
    if queue_occupancy > QUEUE_FULL_THRESHOLD {
        issues.push(HealthIssue::QueueNearlyFull);
    }
    issues
}

/// Quality score in [0, 100]
///
/// `100 − dropRate×50`, −20 if average latency exceeds 100ms, another −20
/// above 200ms, −15 under memory pressure.
///
/// Latency is the average gap between chunk arrivals, not transport or
/// decode delay, so a sender pacing chunks 250ms apart scores at most 60
/// even with no loss.
pub fn quality_score(drop_rate: f64, avg_latency_ms: f64, memory_pressure: bool) -> f64 {
    let mut score = 100.0 - drop_rate * 50.0;
    if avg_latency_ms > 100.0 {
        score -= 20.0;
    }
    if avg_latency_ms > 200.0 {
        score -= 20.0;
    }
    if memory_pressure {
        score -= 15.0;
    }
    score.clamp(0.0, 100.0)
}

/// Queue section of the health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueReport {
    pub size: usize,
    pub max_count: usize,
    pub occupancy: f64,
    pub total_duration_secs: f64,
    pub estimated_bytes: u64,
    pub max_memory_bytes: u64,
    pub memory_occupancy: f64,
    pub evicted: u64,
}

impl QueueReport {
    pub fn from_queue(queue: &PlaybackQueue) -> Self {
        Self {
            size: queue.size(),
            max_count: queue.max_count(),
            occupancy: queue.occupancy(),
            total_duration_secs: queue.total_duration(),
            estimated_bytes: queue.estimated_bytes(),
            max_memory_bytes: queue.max_memory_bytes(),
            memory_occupancy: queue.memory_occupancy(),
            evicted: queue.evicted_count(),
        }
    }
}

/// Everything the report is computed from
pub struct ReportInputs {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub device_state: DeviceState,
    pub queue: QueueReport,
    pub pool: PoolStats,
    pub metrics: MetricsSnapshot,
    pub average_latency_ms: f64,
    pub external_memory_pressure: bool,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Pull-style health report for the host
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub status: HealthStatus,
    pub state: HealthState,
    pub issues: Vec<HealthIssue>,
    pub device_state: DeviceState,
    pub memory_pressure: bool,
    pub consecutive_failures: u32,
    pub quality_score: f64,
    pub quality: QualityBand,
    pub queue: QueueReport,
    pub pool: PoolStats,
    pub metrics: MetricsSnapshot,
    pub recent_errors: Vec<ErrorRecord>,
}

impl HealthReport {
    pub fn assemble(inputs: ReportInputs) -> Self {
        let memory_pressure = inputs.external_memory_pressure
            || inputs.queue.memory_occupancy > MEMORY_PRESSURE_THRESHOLD;
        let issues = assess_issues(
            inputs.device_state,
            inputs.metrics.drop_rate,
            memory_pressure,
            inputs.queue.occupancy,
        );
        let score = quality_score(
            inputs.metrics.drop_rate,
            inputs.average_latency_ms,
            memory_pressure,
        );

        Self {
            generated_at: lsap_common::time::now(),
            status: HealthStatus::from_issue_count(issues.len()),
            state: inputs.state,
            issues,
            device_state: inputs.device_state,
            memory_pressure,
            consecutive_failures: inputs.consecutive_failures,
            quality_score: score,
            quality: QualityBand::from_score(score),
            queue: inputs.queue,
            pool: inputs.pool,
            metrics: inputs.metrics,
            recent_errors: inputs.recent_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_issues_is_healthy() {
        let issues = assess_issues(DeviceState::Active, 0.0, false, 0.5);
        assert!(issues.is_empty());
        assert_eq!(HealthStatus::from_issue_count(issues.len()), HealthStatus::Healthy);
    }

    #[test]
    fn test_two_issues_is_warning() {
        let issues = assess_issues(DeviceState::Suspended, 0.2, false, 0.5);
        assert_eq!(issues, vec![HealthIssue::DeviceInactive, HealthIssue::HighDropRate]);
        assert_eq!(HealthStatus::from_issue_count(issues.len()), HealthStatus::Warning);
    }

    #[test]
    fn test_three_issues_is_critical() {
        let issues = assess_issues(DeviceState::Closed, 0.5, true, 0.95);
        assert_eq!(issues.len(), 4);
        assert_eq!(HealthStatus::from_issue_count(issues.len()), HealthStatus::Critical);
    }

    #[test]
    fn test_quality_score_perfect() {
        assert_eq!(quality_score(0.0, 20.0, false), 100.0);
    }

    #[test]
    fn test_quality_score_penalties() {
        // 100 - 10 - 20 = 70
        assert_eq!(quality_score(0.2, 150.0, false), 70.0);
        // 100 - 0 - 40 - 15 = 45
        assert_eq!(quality_score(0.0, 250.0, true), 45.0);
        assert_eq!(QualityBand::from_score(45.0), QualityBand::Fair);
    }

    #[test]
    fn test_arrival_gap_drives_latency_penalty() {
        use crate::telemetry::metrics::Metrics;
        use std::time::Duration;
        use tokio::time::Instant;

        let mut metrics = Metrics::new();
        let base = Instant::now();
        for i in 0..5 {
            metrics.record_arrival(base + Duration::from_millis(250 * i));
            metrics.record_processed();
        }

        assert_eq!(metrics.average_latency_ms(), 250.0);
        let score = quality_score(metrics.drop_rate(), metrics.average_latency_ms(), false);
        assert_eq!(score, 60.0);
        assert_eq!(QualityBand::from_score(score), QualityBand::Good);
    }

    #[test]
    fn test_quality_score_clamped() {
        assert_eq!(quality_score(1.0, 500.0, true), 0.0);
    }

    #[test]
    fn test_assemble_detects_memory_pressure_from_queue() {
        let report = HealthReport::assemble(ReportInputs {
            state: HealthState::Normal,
            consecutive_failures: 0,
            device_state: DeviceState::Active,
            queue: QueueReport {
                size: 5,
                max_count: 50,
                occupancy: 0.1,
                total_duration_secs: 5.0,
                estimated_bytes: 95,
                max_memory_bytes: 100,
                memory_occupancy: 0.95,
                evicted: 0,
            },
            pool: PoolStats::default(),
            metrics: MetricsSnapshot::default(),
            average_latency_ms: 0.0,
            external_memory_pressure: false,
            recent_errors: Vec::new(),
        });
        assert!(report.memory_pressure);
        assert_eq!(report.issues, vec![HealthIssue::MemoryPressure]);
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.quality_score, 85.0);
        assert_eq!(report.quality, QualityBand::Excellent);
    }
}

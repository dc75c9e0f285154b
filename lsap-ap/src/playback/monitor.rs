//! Background health monitoring

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::StreamEngine;
use crate::telemetry::HealthReport;
use lsap_common::events::QualityBand;

/// Tracks the last announced quality band
#[derive(Debug)]
pub struct QualityTracker {
    last: QualityBand,
}

impl Default for QualityTracker {
    fn default() -> Self {
        // A fresh stream scores 100
        Self {
            last: QualityBand::Excellent,
        }
    }
}

impl QualityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new band if it differs from the last one seen
    pub fn observe(&mut self, report: &HealthReport) -> Option<QualityBand> {
        if report.quality == self.last {
            return None;
        }
        self.last = report.quality;
        Some(report.quality)
    }
}

/// Start the health monitor task
///
/// Recomputes the health report every `interval` and emits `QualityChange`
/// when the band moves. Ends on its own once the engine is dropped.
pub fn start_health_monitor(engine: Weak<StreamEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(health_monitor_task(engine, interval))
}

async fn health_monitor_task(engine: Weak<StreamEngine>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tracker = QualityTracker::new();

    info!("Health monitor started ({}ms interval)", period.as_millis());

    loop {
        interval.tick().await;

        let Some(engine) = engine.upgrade() else {
            break;
        };

        let report = engine.health_report();
        if let Some(band) = tracker.observe(&report) {
            engine.telemetry().report_quality_change(band);
        }

        debug!(
            "Health: {} ({}), quality {:.0} ({}), queue {}/{}, processed {}, dropped {}",
            report.status,
            report.state,
            report.quality_score,
            report.quality,
            report.queue.size,
            report.queue.max_count,
            report.metrics.processed,
            report.metrics.dropped
        );
    }

    debug!("Health monitor stopped");
}

//! Health and quality type definitions
//!
//! Shared between the engine (which computes them) and the UI collaborator
//! (which renders them).

use serde::{Deserialize, Serialize};

/// System-wide operating state of the playback engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Default limits, full retry budgets
    #[default]
    Normal,
    /// Degraded mode after sustained failures: narrowed limits, fail-fast retries
    Recovery,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Normal => write!(f, "normal"),
            HealthState::Recovery => write!(f, "recovery"),
        }
    }
}

/// Overall health classification derived from detected issues
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No issues detected
    Healthy,
    /// One or two issues detected
    Warning,
    /// Three or more issues detected
    Critical,
}

impl HealthStatus {
    /// Classify from the number of detected issues
    pub fn from_issue_count(issues: usize) -> Self {
        match issues {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Stream quality band derived from the 0-100 quality score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityBand {
    /// Map a quality score to its band
    ///
    /// Bands: >= 80 Excellent, >= 60 Good, >= 40 Fair, otherwise Poor.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            QualityBand::Excellent
        } else if score >= 60.0 {
            QualityBand::Good
        } else if score >= 40.0 {
            QualityBand::Fair
        } else {
            QualityBand::Poor
        }
    }
}

impl std::fmt::Display for QualityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityBand::Excellent => write!(f, "excellent"),
            QualityBand::Good => write!(f, "good"),
            QualityBand::Fair => write!(f, "fair"),
            QualityBand::Poor => write!(f, "poor"),
        }
    }
}

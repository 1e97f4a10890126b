//! False-positive accounting for the probabilistic match phase.

use serde::{Deserialize, Serialize};

use crate::scheduler::Persistence;

/// Which event triggered an accuracy report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyPhase {
    Hit,
    FalsePositive,
    Negative,
}

impl AccuracyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::FalsePositive => "false",
            Self::Negative => "neg",
        }
    }
}

/// How loudly a report should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
}

/// False-positive rate boundaries, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyThresholds {
    pub info_percent: f64,
    pub warn_percent: f64,
}

impl Default for AccuracyThresholds {
    fn default() -> Self {
        Self {
            info_percent: 2.0,
            warn_percent: 10.0,
        }
    }
}

/// Snapshot of the registry's match counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterAccuracy {
    pub persistence: Persistence,
    pub true_positives: u64,
    pub false_positives: u64,
    pub negatives: u64,
}

impl FilterAccuracy {
    /// Share of positive deliveries nobody accepted, in percent.
    pub fn false_positive_percent(&self) -> f64 {
        let positives = self.true_positives + self.false_positives;
        if positives == 0 {
            return 0.0;
        }
        self.false_positives as f64 * 100.0 / positives as f64
    }

    pub fn severity(&self, thresholds: &AccuracyThresholds) -> Severity {
        let percent = self.false_positive_percent();
        if percent > thresholds.warn_percent {
            Severity::Warn
        } else if percent > thresholds.info_percent {
            Severity::Info
        } else {
            Severity::Debug
        }
    }
}

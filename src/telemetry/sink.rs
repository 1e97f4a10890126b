//! Injected diagnostics sink.
//!
//! The registry always reports; the sink decides what to surface. The default
//! sink maps report severity onto tracing levels and leaves filtering to the
//! subscriber.

use tracing::{debug, info, warn};

use crate::matching::{AccuracyPhase, FilterAccuracy, Severity};

pub trait DiagnosticSink: Send + Sync {
    fn filter_accuracy(&self, phase: AccuracyPhase, report: &FilterAccuracy, severity: Severity);
}

/// Emits accuracy reports as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn filter_accuracy(&self, phase: AccuracyPhase, report: &FilterAccuracy, severity: Severity) {
        let percent = report.false_positive_percent();
        let durable = report.persistence.is_durable();
        match severity {
            Severity::Warn => warn!(
                phase = phase.as_str(),
                durable,
                false_positive_percent = percent,
                false_positives = report.false_positives,
                true_positives = report.true_positives,
                negatives = report.negatives,
                "Pending-key filter false positive rate is high"
            ),
            Severity::Info => info!(
                phase = phase.as_str(),
                durable,
                false_positive_percent = percent,
                false_positives = report.false_positives,
                true_positives = report.true_positives,
                negatives = report.negatives,
                "Pending-key filter false positives"
            ),
            Severity::Debug => debug!(
                phase = phase.as_str(),
                durable,
                false_positive_percent = percent,
                false_positives = report.false_positives,
                true_positives = report.true_positives,
                negatives = report.negatives,
                "Pending-key filter accuracy"
            ),
        }
    }
}

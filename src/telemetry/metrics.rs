//! Metrics facade hooks.
//!
//! Records through the `metrics` crate; without an installed recorder these
//! are no-ops.

use crate::matching::BlockDelivery;
use crate::scheduler::SchedulerKind;

pub fn record_registration(kind: SchedulerKind) {
    metrics::counter!("keysched_items_registered_total", "scheduler" => kind.to_string()).increment(1);
}

pub fn record_removal(kind: SchedulerKind) {
    metrics::counter!("keysched_items_removed_total", "scheduler" => kind.to_string()).increment(1);
}

pub fn record_queue_depth(kind: SchedulerKind, depth: usize) {
    metrics::gauge!("keysched_items_queued", "scheduler" => kind.to_string()).set(depth as f64);
}

pub fn record_listener_count(kind: SchedulerKind, count: usize) {
    metrics::gauge!("keysched_key_listeners", "scheduler" => kind.to_string()).set(count as f64);
}

pub fn record_block_delivery(kind: SchedulerKind, delivery: &BlockDelivery) {
    let outcome = match delivery {
        BlockDelivery::Accepted { .. } => "true_positive",
        BlockDelivery::FalsePositive { .. } => "false_positive",
        BlockDelivery::NoCandidates => "negative",
    };
    metrics::counter!(
        "keysched_block_deliveries_total",
        "scheduler" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

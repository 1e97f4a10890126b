//! Pending-key matching: who is waiting for which block.
//!
//! Listeners answer a cheap probabilistic question first and an
//! authoritative one only for the candidates that pass it.

mod accuracy;
mod bloom;
mod filtered;
mod listener;
mod registry;

pub use accuracy::{AccuracyPhase, AccuracyThresholds, FilterAccuracy, Severity};
pub use bloom::CountingBloomFilter;
pub use filtered::{BlockHandler, FilteredKeyListener};
pub use listener::{KeyListener, ListenerId};
pub use registry::{BlockDelivery, ListenerRegistry};

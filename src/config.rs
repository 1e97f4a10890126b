//! Scheduler configuration loading from TOML.
//!
//! Every field is optional. Missing values take defaults and invalid values
//! fall back to defaults or are clamped to a floor, never rejected.
//!
//! # Keys
//!
//! | Key | Default | Description |
//! |---|---|---|
//! | `most_urgent_priority` | 0 | Most urgent priority class accepted |
//! | `least_urgent_priority` | 6 | Least urgent priority class accepted |
//! | `retry_floor` | 3 | Retries absorbed before an item drops a tier |
//! | `negative_log_interval` | 32 | Negatives between accuracy reports |
//! | `pick_attempts` | 5 | Picks tried before giving up on a priority |
//! | `accuracy.info_percent` | 2.0 | False-positive rate reported at info |
//! | `accuracy.warn_percent` | 10.0 | False-positive rate reported at warn |
//! | `listener_filter.expected_keys` | 1024 | Filter capacity for `SchedulerCore::new_listener` |
//! | `listener_filter.false_positive_rate` | 0.01 | Filter target rate for `SchedulerCore::new_listener` |

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matching::AccuracyThresholds;
use crate::scheduler::{PriorityClass, PriorityRange, MIN_RETRY_FLOOR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Sizing for filters built by [`crate::matching::FilteredKeyListener`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerFilterConfig {
    pub expected_keys: usize,
    pub false_positive_rate: f64,
}

impl Default for ListenerFilterConfig {
    fn default() -> Self {
        Self {
            expected_keys: 1024,
            false_positive_rate: 0.01,
        }
    }
}

impl ListenerFilterConfig {
    fn sanitize(self) -> Self {
        let defaults = Self::default();
        let rate = self.false_positive_rate;
        Self {
            expected_keys: self.expected_keys.max(1),
            false_positive_rate: if rate.is_finite() && rate > 0.0 && rate < 1.0 {
                rate
            } else {
                defaults.false_positive_rate
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub most_urgent_priority: u8,
    pub least_urgent_priority: u8,
    pub retry_floor: u32,
    pub negative_log_interval: u64,
    pub pick_attempts: usize,
    pub accuracy: AccuracyThresholds,
    pub listener_filter: ListenerFilterConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            most_urgent_priority: PriorityClass::MAXIMUM.value(),
            least_urgent_priority: PriorityClass::MINIMUM.value(),
            retry_floor: MIN_RETRY_FLOOR,
            negative_log_interval: 32,
            pick_attempts: 5,
            accuracy: AccuracyThresholds::default(),
            listener_filter: ListenerFilterConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: SchedulerConfig = toml::from_str(text)?;
        Ok(raw.sanitize())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Clamp every field into its valid range.
    pub fn sanitize(self) -> Self {
        let defaults = Self::default();
        let max = PriorityClass::MINIMUM.value();
        let most_urgent = self.most_urgent_priority.min(max);
        let least_urgent = self.least_urgent_priority.min(max);

        let mut accuracy = self.accuracy;
        let valid_percent = |p: f64| p.is_finite() && p >= 0.0;
        if !valid_percent(accuracy.info_percent) || !valid_percent(accuracy.warn_percent) {
            accuracy = defaults.accuracy;
        }
        if accuracy.warn_percent < accuracy.info_percent {
            accuracy.warn_percent = accuracy.info_percent;
        }

        Self {
            most_urgent_priority: most_urgent.min(least_urgent),
            least_urgent_priority: least_urgent.max(most_urgent),
            retry_floor: self.retry_floor,
            negative_log_interval: self.negative_log_interval.max(1),
            pick_attempts: self.pick_attempts.max(1),
            accuracy,
            listener_filter: self.listener_filter.sanitize(),
        }
    }

    pub fn priority_range(&self) -> PriorityRange {
        PriorityRange::new(
            PriorityClass::new(self.most_urgent_priority),
            PriorityClass::new(self.least_urgent_priority),
        )
    }
}

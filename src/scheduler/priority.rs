//! Priority classes.
//!
//! Lower values are more urgent. The dispatcher drains a more urgent class
//! completely before it considers a less urgent one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority class of a schedulable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityClass(u8);

impl PriorityClass {
    /// Anything more important than fproxy.
    pub const MAXIMUM: Self = Self(0);
    /// Interactive requests, e.g. a page being viewed.
    pub const INTERACTIVE: Self = Self(1);
    /// Splitfile fetches the user is waiting on.
    pub const IMMEDIATE_SPLITFILE: Self = Self(2);
    /// Update polling.
    pub const UPDATE: Self = Self(3);
    /// Background bulk downloads.
    pub const BULK_SPLITFILE: Self = Self(4);
    /// Speculative prefetch.
    pub const PREFETCH: Self = Self(5);
    /// Lowest priority.
    pub const MINIMUM: Self = Self(6);

    /// Number of priority classes in the default range.
    pub const COUNT: usize = 7;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true if `self` should be served before `other`.
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::BULK_SPLITFILE
    }
}

impl From<u8> for PriorityClass {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive range of accepted priority classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityRange {
    most_urgent: PriorityClass,
    least_urgent: PriorityClass,
}

impl PriorityRange {
    /// Build a range; the bounds are reordered if given backwards.
    pub fn new(most_urgent: PriorityClass, least_urgent: PriorityClass) -> Self {
        if most_urgent <= least_urgent {
            Self { most_urgent, least_urgent }
        } else {
            Self { most_urgent: least_urgent, least_urgent: most_urgent }
        }
    }

    pub fn most_urgent(&self) -> PriorityClass {
        self.most_urgent
    }

    pub fn least_urgent(&self) -> PriorityClass {
        self.least_urgent
    }

    pub fn contains(&self, priority: PriorityClass) -> bool {
        priority >= self.most_urgent && priority <= self.least_urgent
    }

    /// Number of slots needed to index every class up to `least_urgent`.
    pub(crate) fn table_len(&self) -> usize {
        self.least_urgent.index() + 1
    }

    /// Classes in dispatch order, most urgent first.
    pub fn iter(&self) -> impl Iterator<Item = PriorityClass> {
        (self.most_urgent.0..=self.least_urgent.0).map(PriorityClass)
    }
}

impl Default for PriorityRange {
    fn default() -> Self {
        Self::new(PriorityClass::MAXIMUM, PriorityClass::MINIMUM)
    }
}

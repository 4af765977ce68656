//! Progress Allocation
//!
//! Integer work budgets divided across a resource's children. A division
//! remainder is never reported, so percent-complete may finish below the
//! top-level budget but never above it.

use serde::{Deserialize, Serialize};

/// Per-child share of `budget` over `children` surviving links.
///
/// Zero children yields the whole budget, credited to the node itself.
pub fn divide(budget: u32, children: usize) -> u32 {
    if children == 0 {
        return budget;
    }
    budget / u32::try_from(children).unwrap_or(u32::MAX)
}

/// Running percent-complete of one task, clamped to 100
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressAccumulator {
    percent: u32,
}

impl ProgressAccumulator {
    pub fn new(start: u32) -> Self {
        Self {
            percent: start.min(100),
        }
    }

    /// Add a completed delta and return the new percent
    pub fn advance(&mut self, delta: u32) -> u32 {
        self.percent = self.percent.saturating_add(delta).min(100);
        self.percent
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }
}

//! Execution counters for tier-up decisions
//!
//! Atomic counters the interpreter bumps at method entry and on backward
//! jumps. Once either crosses its `TierPolicy` threshold a tiered method
//! switches to its node body for good.

use crate::config::TierPolicy;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Counters for one IR unit
#[derive(Debug, Default)]
pub struct ExecutionProfile {
    /// Number of times the unit has been entered
    pub call_count: AtomicU32,
    /// Number of backward jumps taken
    pub loop_count: AtomicU32,
    /// Whether the unit has been promoted to its node body
    promoted: AtomicBool,
}

impl ExecutionProfile {
    /// Cold profile
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry, return the new count
    pub fn record_call(&self) -> u32 {
        self.call_count
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Record a backward jump, return the new count
    pub fn record_loop(&self) -> u32 {
        self.loop_count
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Entries recorded
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Backward jumps recorded
    pub fn loops(&self) -> u32 {
        self.loop_count.load(Ordering::Relaxed)
    }

    /// Whether either counter reached its tier-up threshold
    pub fn is_hot(&self, policy: &TierPolicy) -> bool {
        self.calls() >= policy.call_threshold || self.loops() >= policy.loop_threshold
    }

    /// Whether the unit already runs as nodes
    pub fn is_promoted(&self) -> bool {
        self.promoted.load(Ordering::Acquire)
    }

    /// Claim the promotion (CAS); true for exactly one caller
    pub fn try_promote(&self) -> bool {
        self.promoted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

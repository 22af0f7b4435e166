//! Atomic counters for membrane observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and never
//! synchronize anything.

use std::sync::atomic::{AtomicU64, Ordering};

/// Membrane operation counters.
pub struct MembraneMetrics {
    /// Tagged allocations handed out.
    pub allocations: AtomicU64,
    /// Allocation requests that returned no pointer.
    pub allocation_failures: AtomicU64,
    /// Blocks released.
    pub releases: AtomicU64,
    /// Release requests refused (untracked or stale pointers).
    pub rejected_releases: AtomicU64,
    /// Pointer validations performed.
    pub validations: AtomicU64,
    /// Validations that did not match the shadow table.
    pub validation_failures: AtomicU64,
    /// Untagged pointers to untracked memory let through the gate.
    pub foreign_passthroughs: AtomicU64,
    /// Bulk operations issued from inside the membrane and passed through.
    pub reentrant_passthroughs: AtomicU64,
    /// Copies that went through the gate.
    pub gated_copies: AtomicU64,
    /// Fills that went through the gate.
    pub gated_fills: AtomicU64,
    /// Gate violations (each one ends the process).
    pub violations: AtomicU64,
    /// Shadow entries overwritten through the diagnostic override.
    pub forced_tags: AtomicU64,
}

impl MembraneMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            rejected_releases: AtomicU64::new(0),
            validations: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            foreign_passthroughs: AtomicU64::new(0),
            reentrant_passthroughs: AtomicU64::new(0),
            gated_copies: AtomicU64::new(0),
            gated_fills: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            forced_tags: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            allocation_failures: Self::get(&self.allocation_failures),
            releases: Self::get(&self.releases),
            rejected_releases: Self::get(&self.rejected_releases),
            validations: Self::get(&self.validations),
            validation_failures: Self::get(&self.validation_failures),
            foreign_passthroughs: Self::get(&self.foreign_passthroughs),
            reentrant_passthroughs: Self::get(&self.reentrant_passthroughs),
            gated_copies: Self::get(&self.gated_copies),
            gated_fills: Self::get(&self.gated_fills),
            violations: Self::get(&self.violations),
            forced_tags: Self::get(&self.forced_tags),
        }
    }
}

impl Default for MembraneMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all membrane counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub allocation_failures: u64,
    pub releases: u64,
    pub rejected_releases: u64,
    pub validations: u64,
    pub validation_failures: u64,
    pub foreign_passthroughs: u64,
    pub reentrant_passthroughs: u64,
    pub gated_copies: u64,
    pub gated_fills: u64,
    pub violations: u64,
    pub forced_tags: u64,
}

impl MetricsSnapshot {
    /// Blocks currently handed out and not yet released.
    #[must_use]
    pub fn live_blocks(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }
}

//! Non-blocking resolve-once state word.
//!
//! Process-wide lookups on the `memcpy` path (the check mode, the real
//! primitives) cannot use `OnceLock`: resolving them may itself copy memory,
//! and that copy re-enters the lookup on the same thread while it is still
//! being initialised. A [`ResolveOnce`] never waits. Exactly one caller wins
//! the right to resolve; everyone arriving before it publishes is told the
//! value is busy and falls back to a safe default.

use std::sync::atomic::{AtomicU8, Ordering};

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = u8::MAX;

/// What a caller of [`ResolveOnce::claim`] has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Published earlier; use this value.
    Resolved(u8),
    /// Another call (possibly further up this thread's stack) is resolving.
    Busy,
    /// This caller must resolve and then [`ResolveOnce::publish`].
    Won,
}

/// One-byte state: unresolved, resolving, or a published value in `1..=254`.
pub struct ResolveOnce {
    state: AtomicU8,
}

impl ResolveOnce {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNRESOLVED),
        }
    }

    #[must_use]
    pub fn claim(&self) -> Claim {
        match self.state.load(Ordering::Acquire) {
            UNRESOLVED => {}
            RESOLVING => return Claim::Busy,
            value => return Claim::Resolved(value),
        }
        match self.state.compare_exchange(
            UNRESOLVED,
            RESOLVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Claim::Won,
            Err(RESOLVING | UNRESOLVED) => Claim::Busy,
            Err(value) => Claim::Resolved(value),
        }
    }

    /// Publish the resolved value. `value` must lie in `1..=254`.
    pub fn publish(&self, value: u8) {
        debug_assert!(value != UNRESOLVED && value != RESOLVING);
        self.state.store(value, Ordering::Release);
    }

    /// The published value, if any, without claiming.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        match self.state.load(Ordering::Acquire) {
            UNRESOLVED | RESOLVING => None,
            value => Some(value),
        }
    }

    /// Overwrite the raw state; returns the previous one.
    #[cfg(test)]
    pub(crate) fn replace_raw(&self, raw: u8) -> u8 {
        self.state.swap(raw, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) const RESOLVING_RAW: u8 = RESOLVING;
}

impl Default for ResolveOnce {
    fn default() -> Self {
        Self::new()
    }
}

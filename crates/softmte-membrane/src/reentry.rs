//! Per-thread "inside the membrane" marker.
//!
//! While a thread holds the shadow-table lock, anything it does (tree
//! rebalancing, allocation, environment reads) may call `memcpy`/`memset`.
//! When those symbols are interposed, such calls must bypass validation or
//! the gate would try to take the lock it already holds.

use std::cell::Cell;

thread_local! {
    static MEMBRANE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as inside the membrane until dropped.
#[must_use = "the thread leaves the membrane when the guard is dropped"]
pub struct MembraneGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for MembraneGuard {
    fn drop(&mut self) {
        let _ = MEMBRANE_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Enter the membrane. Nested entry is allowed.
pub fn enter() -> MembraneGuard {
    let _ = MEMBRANE_DEPTH.try_with(|depth| depth.set(depth.get().saturating_add(1)));
    MembraneGuard {
        _not_send: std::marker::PhantomData,
    }
}

/// Enter the membrane only if the thread is not already inside it.
#[must_use]
pub fn try_enter() -> Option<MembraneGuard> {
    if is_inside() { None } else { Some(enter()) }
}

/// Returns true while the current thread holds at least one guard.
///
/// Returns true during thread teardown, when the thread-local is gone.
#[must_use]
pub fn is_inside() -> bool {
    MEMBRANE_DEPTH
        .try_with(|depth| depth.get() > 0)
        .unwrap_or(true)
}

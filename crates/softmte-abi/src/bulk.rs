//! Bulk-memory strategies.
//!
//! [`RawBulk`] forwards to the real primitives. [`ValidatedBulk`] is the
//! gate: it checks the source and then the destination against the shadow
//! table, aborts on the first violation, and forwards the stripped raw
//! addresses otherwise. Nothing is copied or filled before both checks pass.

use std::ffi::{c_int, c_void};

use softmte_membrane::{CheckMode, MembraneMetrics, Operand, TagMembrane, TaggedPtr, reentry};

use crate::fatal;
use crate::real::{self, Resolution};

/// A `memcpy`/`memset` implementation.
pub trait BulkMemory {
    /// Copy `n` bytes from `src` to `dst`; returns the destination handed to
    /// the underlying primitive.
    ///
    /// # Safety
    ///
    /// Same contract as C `memcpy` on the stripped addresses.
    unsafe fn copy(&self, dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void;

    /// Set `n` bytes at `dst` to `(value as u8)`.
    ///
    /// # Safety
    ///
    /// Same contract as C `memset` on the stripped address.
    unsafe fn fill(&self, dst: *mut c_void, value: c_int, n: usize) -> *mut c_void;
}

/// Straight passthrough to the real primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBulk;

impl BulkMemory for RawBulk {
    unsafe fn copy(&self, dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
        match real::primitives() {
            // SAFETY: caller upholds the memcpy contract.
            Resolution::Ready(real) => unsafe { (real.memcpy)(dst, src, n) },
            Resolution::Resolving => {
                // SAFETY: caller upholds the memcpy contract.
                unsafe { real::volatile_copy(dst.cast(), src.cast(), n) };
                dst
            }
            Resolution::Failed => fatal::unresolved("memcpy"),
        }
    }

    unsafe fn fill(&self, dst: *mut c_void, value: c_int, n: usize) -> *mut c_void {
        match real::primitives() {
            // SAFETY: caller upholds the memset contract.
            Resolution::Ready(real) => unsafe { (real.memset)(dst, value, n) },
            Resolution::Resolving => {
                // SAFETY: caller upholds the memset contract.
                unsafe { real::volatile_fill(dst.cast(), value as u8, n) };
                dst
            }
            Resolution::Failed => fatal::unresolved("memset"),
        }
    }
}

/// The tag-checking gate.
#[derive(Clone, Copy)]
pub struct ValidatedBulk<'a> {
    membrane: &'a TagMembrane,
    mode: CheckMode,
}

impl<'a> ValidatedBulk<'a> {
    #[must_use]
    pub fn new(membrane: &'a TagMembrane, mode: CheckMode) -> Self {
        Self { membrane, mode }
    }

    fn gate(&self, operation: &'static str, operand: Operand, ptr: usize, n: usize) -> usize {
        match self.membrane.check_operand(
            operation,
            operand,
            TaggedPtr::from_addr(ptr),
            n,
            self.mode,
        ) {
            Ok(raw) => raw,
            Err(violation) => fatal::violation(&violation),
        }
    }
}

impl BulkMemory for ValidatedBulk<'_> {
    unsafe fn copy(&self, dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
        // Held until the real primitive returns: every move the checks make
        // may itself be a `memcpy` call.
        let Some(_inside) = reentry::try_enter() else {
            MembraneMetrics::inc(&self.membrane.metrics().reentrant_passthroughs);
            // SAFETY: issued by the membrane itself on untagged memory.
            return unsafe { RawBulk.copy(dst, src, n) };
        };

        let src_raw = self.gate("memcpy", Operand::Source, src as usize, n);
        let dst_raw = self.gate("memcpy", Operand::Destination, dst as usize, n);
        MembraneMetrics::inc(&self.membrane.metrics().gated_copies);
        if n == 0 {
            return dst_raw as *mut c_void;
        }
        // SAFETY: both operands passed the gate; caller upholds the memcpy
        // contract on the raw addresses.
        unsafe { RawBulk.copy(dst_raw as *mut c_void, src_raw as *const c_void, n) }
    }

    unsafe fn fill(&self, dst: *mut c_void, value: c_int, n: usize) -> *mut c_void {
        let Some(_inside) = reentry::try_enter() else {
            MembraneMetrics::inc(&self.membrane.metrics().reentrant_passthroughs);
            // SAFETY: issued by the membrane itself on untagged memory.
            return unsafe { RawBulk.fill(dst, value, n) };
        };

        if matches!(real::primitives(), Resolution::Failed) {
            fatal::unresolved("memset");
        }
        let dst_raw = self.gate("memset", Operand::Destination, dst as usize, n);
        MembraneMetrics::inc(&self.membrane.metrics().gated_fills);
        if n == 0 {
            return dst_raw as *mut c_void;
        }
        // SAFETY: the operand passed the gate; caller upholds the memset
        // contract on the raw address.
        unsafe { RawBulk.fill(dst_raw as *mut c_void, value, n) }
    }
}

//! `softmte_*` C entry points.
//!
//! These are exported in every build: their names cannot collide with libc,
//! so unlike the interposed `memcpy`/`memset` they are safe to link into test
//! binaries.

use std::ffi::{c_int, c_void};

use softmte_membrane::{TaggedPtr, codec};

use crate::bulk::{BulkMemory, ValidatedBulk};
use crate::state::{membrane, validating_mode};

/// Allocate `size` bytes; returns a tagged pointer, or NULL for zero size or
/// allocation failure.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_malloc(size: usize) -> *mut c_void {
    match membrane().allocate(size) {
        Ok(ptr) => ptr.as_ptr(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Release a block from `softmte_malloc`.
///
/// Returns 0 on success (and for NULL), -1 if the pointer is untracked or
/// carries a stale tag; nothing is freed in that case.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_free(ptr: *mut c_void) -> c_int {
    if ptr.is_null() {
        return 0;
    }
    match membrane().release(TaggedPtr::from_ptr(ptr)) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// The tag embedded in `ptr`.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_pointer_tag(ptr: *const c_void) -> u8 {
    codec::extract_tag(ptr as usize).get()
}

/// The shadow tag recorded for `ptr`'s raw address, or -1 if none.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_shadow_tag(ptr: *const c_void) -> c_int {
    membrane()
        .shadow()
        .lookup(codec::strip(ptr as usize))
        .map_or(-1, |tag| c_int::from(tag.get()))
}

/// 1 if `ptr`'s tag matches its shadow entry, 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_validate(ptr: *const c_void) -> c_int {
    c_int::from(membrane().validate(TaggedPtr::from_ptr(ptr)))
}

/// Reseed the tag generator.
#[unsafe(no_mangle)]
pub extern "C" fn softmte_seed(seed: u64) {
    membrane().seed(seed);
}

/// Validated `memcpy`, regardless of interposition or `SOFTMTE_MODE`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn softmte_memcpy(
    dst: *mut c_void,
    src: *const c_void,
    n: usize,
) -> *mut c_void {
    let gate = ValidatedBulk::new(membrane(), validating_mode());
    // SAFETY: caller upholds the memcpy contract; the gate strips tags.
    unsafe { gate.copy(dst, src, n) }
}

/// Validated `memset`, regardless of interposition or `SOFTMTE_MODE`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn softmte_memset(dst: *mut c_void, c: c_int, n: usize) -> *mut c_void {
    let gate = ValidatedBulk::new(membrane(), validating_mode());
    // SAFETY: caller upholds the memset contract; the gate strips tags.
    unsafe { gate.fill(dst, c, n) }
}

/// Overwrite the shadow tag recorded for `raw`. Diagnostic use only.
#[cfg(feature = "testing")]
#[unsafe(no_mangle)]
pub extern "C" fn softmte_force_shadow_tag(raw: usize, tag: u8) {
    membrane().force_shadow_tag(raw, softmte_membrane::Tag::from_nibble(tag));
}

//! Process-wide `memcpy`/`memset` replacements.
//!
//! Preloading the library built with `--features interpose` routes every
//! dynamically linked `memcpy`/`memset` in the process through here. Tag
//! violations abort; everything else reaches the real primitive with the
//! tags stripped. `SOFTMTE_MODE=off` turns both into plain passthroughs.

use std::ffi::{c_int, c_void};

use softmte_membrane::check_mode;

use crate::bulk::{BulkMemory, RawBulk, ValidatedBulk};
use crate::state::membrane;

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memcpy(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    let mode = check_mode();
    if !mode.validation_enabled() {
        // SAFETY: caller upholds the memcpy contract.
        return unsafe { RawBulk.copy(dst, src, n) };
    }
    // SAFETY: caller upholds the memcpy contract; the gate strips tags.
    unsafe { ValidatedBulk::new(membrane(), mode).copy(dst, src, n) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memset(dst: *mut c_void, c: c_int, n: usize) -> *mut c_void {
    let mode = check_mode();
    if !mode.validation_enabled() {
        // SAFETY: caller upholds the memset contract.
        return unsafe { RawBulk.fill(dst, c, n) };
    }
    // SAFETY: caller upholds the memset contract; the gate strips tags.
    unsafe { ValidatedBulk::new(membrane(), mode).fill(dst, c, n) }
}

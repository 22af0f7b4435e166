//! The genuine `memcpy`/`memset`.
//!
//! Resolved with `dlsym(RTLD_NEXT, ..)` exactly once per process. `dlsym`
//! may itself copy memory, and when this library interposes `memcpy` that
//! copy lands back here while resolution is still in progress. `OnceLock`
//! would block on its own initialiser in that case, so resolution goes through
//! a [`ResolveOnce`] instead, and any caller that finds it busy copies with a
//! volatile byte loop.

use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use softmte_membrane::{Claim, ResolveOnce};

pub type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
pub type MemsetFn = unsafe extern "C" fn(*mut c_void, c_int, usize) -> *mut c_void;

const READY: u8 = 1;
const FAILED: u8 = 2;

static STATE: ResolveOnce = ResolveOnce::new();
static REAL_MEMCPY: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static REAL_MEMSET: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

/// Both primitives, once resolved.
#[derive(Clone, Copy)]
pub struct Primitives {
    pub memcpy: MemcpyFn,
    pub memset: MemsetFn,
}

/// Outcome of asking for the real primitives.
#[derive(Clone, Copy)]
pub enum Resolution {
    Ready(Primitives),
    /// Resolution is in progress on this or another thread.
    Resolving,
    /// `dlsym` found no next definition.
    Failed,
}

fn load_ready() -> Primitives {
    let memcpy = REAL_MEMCPY.load(Ordering::Acquire);
    let memset = REAL_MEMSET.load(Ordering::Acquire);
    // SAFETY: READY is only published after both slots hold non-null
    // addresses returned by dlsym for symbols with exactly these signatures.
    unsafe {
        Primitives {
            memcpy: std::mem::transmute::<*mut c_void, MemcpyFn>(memcpy),
            memset: std::mem::transmute::<*mut c_void, MemsetFn>(memset),
        }
    }
}

fn lookup_next(symbol: &'static [u8]) -> *mut c_void {
    // SAFETY: symbol is a static NUL-terminated name; RTLD_NEXT is a valid
    // pseudo-handle for dlsym.
    unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr().cast()) }
}

/// Resolve the real primitives, or report why they are not available yet.
pub fn primitives() -> Resolution {
    match STATE.claim() {
        Claim::Resolved(READY) => Resolution::Ready(load_ready()),
        Claim::Resolved(_) => Resolution::Failed,
        Claim::Busy => Resolution::Resolving,
        Claim::Won => {
            let memcpy = lookup_next(b"memcpy\0");
            let memset = lookup_next(b"memset\0");
            if memcpy.is_null() || memset.is_null() {
                STATE.publish(FAILED);
                return Resolution::Failed;
            }
            REAL_MEMCPY.store(memcpy, Ordering::Release);
            REAL_MEMSET.store(memset, Ordering::Release);
            STATE.publish(READY);
            Resolution::Ready(load_ready())
        }
    }
}

/// Byte-at-a-time copy the compiler cannot turn back into a `memcpy` call.
///
/// # Safety
///
/// `dst` and `src` must be valid for `n` bytes and must not overlap.
pub unsafe fn volatile_copy(dst: *mut u8, src: *const u8, n: usize) {
    for i in 0..n {
        // SAFETY: caller guarantees both ranges are valid for n bytes.
        unsafe { dst.add(i).write_volatile(src.add(i).read_volatile()) };
    }
}

/// Byte-at-a-time fill the compiler cannot turn back into a `memset` call.
///
/// # Safety
///
/// `dst` must be valid for `n` bytes.
pub unsafe fn volatile_fill(dst: *mut u8, value: u8, n: usize) {
    for i in 0..n {
        // SAFETY: caller guarantees dst is valid for n bytes.
        unsafe { dst.add(i).write_volatile(value) };
    }
}

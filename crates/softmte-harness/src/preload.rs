//! Cases for a child running with `libsoftmte.so` preloaded.
//!
//! With the library built with `--features interpose,testing` and loaded
//! through `LD_PRELOAD`, every `memcpy`/`memset` this binary makes goes
//! through the preloaded gate. The `softmte_*` functions linked into this
//! binary keep their own shadow table. Cases therefore look the entry points
//! up in the preloaded object and copy through the process-wide primitives.

use std::ffi::{CStr, CString, c_int, c_void};

use serde_json::json;
use softmte_membrane::codec;

use crate::error::HarnessError;
use crate::scenarios::Expectation;

pub const PRELOAD_ENV: &str = "LD_PRELOAD";

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type PointerTagFn = unsafe extern "C" fn(*const c_void) -> u8;
type ForceTagFn = unsafe extern "C" fn(usize, u8);
type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
type MemsetFn = unsafe extern "C" fn(*mut c_void, c_int, usize) -> *mut c_void;

/// Entry points of the preloaded library plus the process-wide primitives.
struct Preloaded {
    malloc: MallocFn,
    free: FreeFn,
    pointer_tag: PointerTagFn,
    force_shadow_tag: ForceTagFn,
    memcpy: MemcpyFn,
    memset: MemsetFn,
}

impl Preloaded {
    fn locate() -> Result<Self, HarnessError> {
        let list = std::env::var(PRELOAD_ENV)
            .map_err(|_| HarnessError::Preload(format!("{PRELOAD_ENV} is not set")))?;
        let path = list
            .split([':', ' '])
            .find(|entry| !entry.is_empty())
            .ok_or_else(|| HarnessError::Preload(format!("{PRELOAD_ENV} is empty")))?;
        let c_path = CString::new(path)
            .map_err(|_| HarnessError::Preload(format!("bad library path `{path}`")))?;
        // SAFETY: c_path is NUL-terminated; RTLD_NOLOAD only returns a handle
        // to an object that is already mapped.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        if handle.is_null() {
            return Err(HarnessError::Preload(format!("{path} is not loaded")));
        }

        let lookup = |name: &'static CStr| -> Result<*mut c_void, HarnessError> {
            // SAFETY: handle came from dlopen and name is NUL-terminated.
            let sym = unsafe { libc::dlsym(handle, name.as_ptr()) };
            if sym.is_null() {
                Err(HarnessError::Preload(format!(
                    "{path} does not export {}",
                    name.to_string_lossy()
                )))
            } else {
                Ok(sym)
            }
        };
        let malloc = lookup(c"softmte_malloc")?;
        let free = lookup(c"softmte_free")?;
        let pointer_tag = lookup(c"softmte_pointer_tag")?;
        let force_shadow_tag = lookup(c"softmte_force_shadow_tag")?;

        // SAFETY: each symbol is the `extern "C"` function of that name in
        // the softmte C ABI, with exactly these signatures.
        unsafe {
            Ok(Self {
                malloc: std::mem::transmute::<*mut c_void, MallocFn>(malloc),
                free: std::mem::transmute::<*mut c_void, FreeFn>(free),
                pointer_tag: std::mem::transmute::<*mut c_void, PointerTagFn>(pointer_tag),
                force_shadow_tag: std::mem::transmute::<*mut c_void, ForceTagFn>(
                    force_shadow_tag,
                ),
                // Opaque to the optimiser, so every call reaches the
                // dynamically bound symbol instead of being inlined.
                memcpy: std::hint::black_box(libc::memcpy as MemcpyFn),
                memset: std::hint::black_box(libc::memset as MemsetFn),
            })
        }
    }

    fn alloc(&self, size: usize) -> Result<*mut c_void, HarnessError> {
        // SAFETY: softmte_malloc accepts any size.
        let ptr = unsafe { (self.malloc)(size) };
        if ptr.is_null() {
            Err(HarnessError::AllocationFailed { size })
        } else {
            Ok(ptr)
        }
    }

    fn release(&self, ptr: *mut c_void) -> bool {
        // SAFETY: softmte_free accepts any pointer value.
        unsafe { (self.free)(ptr) == 0 }
    }

    fn tag(&self, ptr: *const c_void) -> u8 {
        // SAFETY: softmte_pointer_tag only inspects the pointer value.
        unsafe { (self.pointer_tag)(ptr) }
    }
}

/// Bytes of a block, read through its untagged address.
///
/// # Safety
///
/// `ptr` must address a live block of at least `len` bytes.
unsafe fn block_bytes<'a>(ptr: *const c_void, len: usize) -> &'a [u8] {
    // SAFETY: caller guarantees the block is live and `len` bytes long.
    unsafe { std::slice::from_raw_parts(codec::strip(ptr as usize) as *const u8, len) }
}

/// A named case run under the preloaded gate.
pub struct PreloadCase {
    pub name: &'static str,
    pub description: &'static str,
    pub expectation: Expectation,
    run: fn(&Preloaded) -> Result<serde_json::Value, HarnessError>,
}

impl PreloadCase {
    /// Run in the current process, which must have the library preloaded.
    pub fn run(&self) -> Result<serde_json::Value, HarnessError> {
        let preloaded = Preloaded::locate()?;
        (self.run)(&preloaded)
    }
}

pub static PRELOAD_CASES: &[PreloadCase] = &[
    PreloadCase {
        name: "interposed-copy",
        description: "plain memcpy between two live blocks",
        expectation: Expectation::Completes,
        run: interposed_copy,
    },
    PreloadCase {
        name: "interposed-fill",
        description: "plain memset over a live block",
        expectation: Expectation::Completes,
        run: interposed_fill,
    },
    PreloadCase {
        name: "interposed-mismatch",
        description: "plain memcpy into a block whose shadow tag was overwritten",
        expectation: Expectation::Aborts,
        run: interposed_mismatch,
    },
];

#[must_use]
pub fn find(name: &str) -> Option<&'static PreloadCase> {
    PRELOAD_CASES.iter().find(|c| c.name == name)
}

fn failed(case: &'static str, reason: &str) -> HarnessError {
    HarnessError::ScenarioFailed {
        scenario: case,
        reason: reason.to_string(),
    }
}

fn interposed_copy(lib: &Preloaded) -> Result<serde_json::Value, HarnessError> {
    const NAME: &str = "interposed-copy";
    let src = lib.alloc(96)?;
    let dst = lib.alloc(96)?;
    // SAFETY: both blocks are 96 bytes; the interposed gate strips the tags.
    unsafe {
        (lib.memset)(src, 0x5A, 96);
        (lib.memset)(dst, 0, 96);
        (lib.memcpy)(dst, src, 96);
    }
    // SAFETY: dst is live and 96 bytes long.
    let copied = unsafe { block_bytes(dst, 96) }.iter().all(|b| *b == 0x5A);
    let details = json!({
        "src_tag": lib.tag(src),
        "dst_tag": lib.tag(dst),
        "copied": copied,
    });
    if !copied {
        return Err(failed(NAME, "destination does not hold the source bytes"));
    }
    if !(lib.release(src) && lib.release(dst)) {
        return Err(failed(NAME, "release refused"));
    }
    Ok(details)
}

fn interposed_fill(lib: &Preloaded) -> Result<serde_json::Value, HarnessError> {
    const NAME: &str = "interposed-fill";
    let block = lib.alloc(40)?;
    // SAFETY: block is 40 bytes; the interposed gate strips the tag.
    unsafe { (lib.memset)(block, 0x1C7, 40) };
    // SAFETY: block is live and 40 bytes long.
    let filled = unsafe { block_bytes(block, 40) }.iter().all(|b| *b == 0xC7);
    if !filled {
        return Err(failed(NAME, "block was not filled"));
    }
    if !lib.release(block) {
        return Err(failed(NAME, "release refused"));
    }
    Ok(json!({ "tag": lib.tag(block), "filled": filled }))
}

fn interposed_mismatch(lib: &Preloaded) -> Result<serde_json::Value, HarnessError> {
    const NAME: &str = "interposed-mismatch";
    let src = lib.alloc(32)?;
    let dst = lib.alloc(32)?;
    let other = (lib.tag(dst) + 1) & 0xF;
    // SAFETY: the override only edits the preloaded shadow table.
    unsafe { (lib.force_shadow_tag)(codec::strip(dst as usize), other) };
    // SAFETY: both blocks are 32 bytes; the gate aborts before copying.
    unsafe { (lib.memcpy)(dst, src, 32) };
    Err(failed(NAME, "memcpy returned despite the tag mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_names_are_unique_and_found() {
        for case in PRELOAD_CASES {
            assert!(std::ptr::eq(find(case.name).expect("listed"), case));
        }
        assert!(find("valid-copy").is_none());
    }

    #[test]
    fn running_without_the_library_reports_it() {
        if std::env::var_os(PRELOAD_ENV).is_some() {
            return;
        }
        let err = PRELOAD_CASES[0].run().expect_err("nothing is preloaded");
        assert!(matches!(err, HarnessError::Preload(_)), "{err}");
    }
}

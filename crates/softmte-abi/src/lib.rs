// All extern "C" ABI exports accept raw pointers from C callers; the gate
// validates at runtime, so per-function safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # softmte-abi
//!
//! C ABI boundary for the softmte membrane.
//!
//! This crate produces a `cdylib` (`libsoftmte.so`) exposing the tagged
//! allocator and the validated bulk-memory operations as `extern "C"`
//! symbols. Built with the `interpose` feature it also exports `memcpy` and
//! `memset` themselves, so preloading it puts every bulk copy and fill in the
//! process behind the tag check.
//!
//! # Architecture
//!
//! ```text
//! C caller -> memcpy/memset (interpose) -> ValidatedBulk -> TagMembrane::check
//!                                                        -> real primitive (dlsym RTLD_NEXT)
//!                                                        -> abort on violation
//! ```

pub mod bulk;
pub mod fatal;
pub mod real;
pub mod state;
pub mod tag_abi;

// Gated behind cfg(not(test)): these exports replace the process-wide
// `memcpy`/`memset`, which the test binary itself relies on.
#[cfg(all(feature = "interpose", not(test)))]
pub mod interpose;

pub use bulk::{BulkMemory, RawBulk, ValidatedBulk};
pub use state::membrane;

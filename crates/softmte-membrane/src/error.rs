//! Recoverable membrane errors.
//!
//! Tag violations detected by the bulk-memory gate are deliberately absent
//! here: they terminate the process (see [`crate::validator::TagViolation`]).

use thiserror::Error;

use crate::codec::Tag;

/// Reasons [`crate::TagMembrane::allocate`] returns no pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("zero-size allocations are rejected")]
    ZeroSize,
    #[error("allocation of {size} bytes exceeds the addressable layout")]
    SizeOverflow { size: usize },
    #[error("underlying allocator failed to provide {size} bytes")]
    OutOfMemory { size: usize },
}

/// Reasons [`crate::TagMembrane::release`] refuses to free a block.
///
/// In both cases nothing is freed and the shadow table is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// No live block starts at the raw address (double free or foreign pointer).
    #[error("release of untracked address {raw:#x}")]
    Untracked { raw: usize },
    /// A live block starts there, but under a different tag (stale pointer).
    #[error(
        "release of {raw:#x} with pointer tag {pointer_tag} but shadow tag {shadow_tag}"
    )]
    TagMismatch {
        raw: usize,
        pointer_tag: Tag,
        shadow_tag: Tag,
    },
}

/// A check-mode string that names no known mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown check mode `{0}` (expected strict, compat or off)")]
pub struct ModeParseError(pub String);

//! Tag validation.
//!
//! Two entry points:
//! - [`TagMembrane::validate`]: does the pointer's tag equal the tag recorded
//!   for its exact raw address? An absent entry is never a match.
//! - [`TagMembrane::check`]: the access check run by the bulk-memory gate,
//!   parameterised by [`CheckMode`].

use std::fmt;

use crate::codec::{Tag, TaggedPtr};
use crate::config::CheckMode;
use crate::membrane::TagMembrane;
use crate::metrics::MembraneMetrics;

/// Result of checking one gate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCheck {
    /// The pointer's tag matches the block it points into.
    Match { base: usize, tag: Tag },
    /// The block is live but recorded under a different tag.
    Mismatch {
        raw: usize,
        pointer_tag: Tag,
        shadow_tag: Tag,
    },
    /// No live block at (or around) the raw address.
    Untracked { raw: usize, pointer_tag: Tag },
    /// The tag matches but the accessed span leaves the block.
    OutOfBounds {
        raw: usize,
        len: usize,
        base: usize,
        block_len: usize,
    },
}

impl TagCheck {
    /// Whether the gate lets the access through.
    ///
    /// Untagged pointers to untracked memory (stack, statics, other
    /// allocators) pass; a tagged pointer with no live block does not.
    #[must_use]
    pub fn permitted(&self, mode: CheckMode) -> bool {
        if !mode.validation_enabled() {
            return true;
        }
        match self {
            Self::Match { .. } => true,
            Self::Untracked { pointer_tag, .. } => *pointer_tag == Tag::ZERO,
            Self::Mismatch { .. } | Self::OutOfBounds { .. } => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Match { .. } => "tag match",
            Self::Mismatch { .. } => "tag mismatch",
            Self::Untracked { .. } => "untracked tagged pointer",
            Self::OutOfBounds { .. } => "out-of-bounds access",
        }
    }
}

/// Which argument of a bulk operation is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Source,
    Destination,
}

impl Operand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "src",
            Self::Destination => "dest",
        }
    }
}

/// A failed gate check. Rendered into the abort diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagViolation {
    pub operation: &'static str,
    pub operand: Operand,
    pub ptr: TaggedPtr,
    pub check: TagCheck,
}

impl fmt::Display for TagViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "softmte: {} in {} ({}): ptr={:#x}",
            self.check.kind(),
            self.operation,
            self.operand.as_str(),
            self.ptr.addr(),
        )?;
        match self.check {
            TagCheck::Match { base, tag } => write!(f, " base={base:#x} tag={tag}"),
            TagCheck::Mismatch {
                raw,
                pointer_tag,
                shadow_tag,
            } => write!(
                f,
                " raw={raw:#x} pointer_tag={pointer_tag} shadow_tag={shadow_tag}"
            ),
            TagCheck::Untracked { raw, pointer_tag } => {
                write!(f, " raw={raw:#x} pointer_tag={pointer_tag} shadow_tag=none")
            }
            TagCheck::OutOfBounds {
                raw,
                len,
                base,
                block_len,
            } => write!(
                f,
                " raw={raw:#x} len={len} block={base:#x}+{block_len}"
            ),
        }
    }
}

impl TagMembrane {
    /// Returns true iff `ptr`'s tag equals the tag recorded for its raw address.
    pub fn validate(&self, ptr: TaggedPtr) -> bool {
        MembraneMetrics::inc(&self.metrics.validations);
        let ok = self.shadow.lookup(ptr.raw()) == Some(ptr.tag());
        if !ok {
            MembraneMetrics::inc(&self.metrics.validation_failures);
        }
        ok
    }

    /// Check an access of `len` bytes through `ptr`.
    ///
    /// `Off` never consults the table and reports a match at the raw address.
    pub fn check(&self, ptr: TaggedPtr, len: usize, mode: CheckMode) -> TagCheck {
        let raw = ptr.raw();
        let pointer_tag = ptr.tag();
        if !mode.validation_enabled() {
            return TagCheck::Match {
                base: raw,
                tag: pointer_tag,
            };
        }
        let result = if mode.extent_aware() {
            self.check_extent(raw, pointer_tag, len)
        } else {
            self.check_base(raw, pointer_tag)
        };

        MembraneMetrics::inc(&self.metrics.validations);
        if let TagCheck::Untracked {
            pointer_tag: Tag::ZERO,
            ..
        } = result
        {
            MembraneMetrics::inc(&self.metrics.foreign_passthroughs);
        }
        if !result.permitted(mode) {
            MembraneMetrics::inc(&self.metrics.validation_failures);
        }
        result
    }

    /// Exact-address lookup: only a block's base address is recognised.
    fn check_base(&self, raw: usize, pointer_tag: Tag) -> TagCheck {
        match self.shadow.lookup(raw) {
            None => TagCheck::Untracked { raw, pointer_tag },
            Some(tag) if tag == pointer_tag => TagCheck::Match { base: raw, tag },
            Some(shadow_tag) => TagCheck::Mismatch {
                raw,
                pointer_tag,
                shadow_tag,
            },
        }
    }

    /// Interior pointers resolve to their block, and the access must fit it.
    fn check_extent(&self, raw: usize, pointer_tag: Tag, len: usize) -> TagCheck {
        match self.shadow.lookup_containing(raw) {
            None => TagCheck::Untracked { raw, pointer_tag },
            Some((_, entry)) if entry.tag != pointer_tag => TagCheck::Mismatch {
                raw,
                pointer_tag,
                shadow_tag: entry.tag,
            },
            Some((base, entry)) => {
                // Extentless entries (len 0) only vouch for their base.
                let in_bounds = entry.len == 0
                    || (raw - base)
                        .checked_add(len)
                        .is_some_and(|end| end <= entry.len);
                if in_bounds {
                    TagCheck::Match {
                        base,
                        tag: entry.tag,
                    }
                } else {
                    TagCheck::OutOfBounds {
                        raw,
                        len,
                        base,
                        block_len: entry.len,
                    }
                }
            }
        }
    }

    /// Gate one operand of `operation`.
    ///
    /// Returns the raw address to hand to the real primitive, or the
    /// violation the caller must report before aborting.
    pub fn check_operand(
        &self,
        operation: &'static str,
        operand: Operand,
        ptr: TaggedPtr,
        len: usize,
        mode: CheckMode,
    ) -> Result<usize, TagViolation> {
        let check = self.check(ptr, len, mode);
        if check.permitted(mode) {
            Ok(ptr.raw())
        } else {
            MembraneMetrics::inc(&self.metrics.violations);
            Err(TagViolation {
                operation,
                operand,
                ptr,
                check,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(v: u8) -> Tag {
        Tag::from_nibble(v)
    }

    #[test]
    fn fresh_allocation_validates() {
        let membrane = TagMembrane::with_seed(21);
        let p = membrane.allocate(64).expect("allocation should succeed");
        assert!(membrane.validate(p));
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn forged_tag_fails_validation() {
        let membrane = TagMembrane::with_seed(21);
        let p = membrane.allocate(64).expect("allocation should succeed");
        let mut forged = p.tag().next();
        for _ in 0..15 {
            assert!(!membrane.validate(p.with_tag(forged)));
            forged = forged.next();
        }
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn absent_entry_never_validates_even_with_tag_zero() {
        let membrane = TagMembrane::with_seed(21);
        let untracked = TaggedPtr::new(0x7000, Tag::ZERO);
        assert!(!membrane.validate(untracked));
        let snap = membrane.metrics().snapshot();
        assert_eq!(snap.validations, 1);
        assert_eq!(snap.validation_failures, 1);
    }

    #[test]
    fn untagged_foreign_pointer_is_permitted_in_both_modes() {
        let membrane = TagMembrane::with_seed(21);
        let local = [0_u8; 8];
        let ptr = TaggedPtr::from_ptr(local.as_ptr());
        for mode in [CheckMode::Strict, CheckMode::Compat] {
            let check = membrane.check(ptr, 8, mode);
            assert_eq!(
                check,
                TagCheck::Untracked {
                    raw: ptr.raw(),
                    pointer_tag: Tag::ZERO
                }
            );
            assert!(check.permitted(mode));
        }
        assert_eq!(membrane.metrics().snapshot().foreign_passthroughs, 2);
    }

    #[test]
    fn tagged_untracked_pointer_is_refused() {
        let membrane = TagMembrane::with_seed(21);
        let ptr = TaggedPtr::new(0x9000, tag(4));
        for mode in [CheckMode::Strict, CheckMode::Compat] {
            assert!(!membrane.check(ptr, 1, mode).permitted(mode));
        }
    }

    #[test]
    fn stale_pointer_is_refused_after_release() {
        let membrane = TagMembrane::with_seed(23);
        for _ in 0..64 {
            let p = membrane.allocate(32).expect("allocation should succeed");
            membrane.release(p).expect("release should succeed");
            // Either untracked (tagged) or a mismatch against a reused block.
            for mode in [CheckMode::Strict, CheckMode::Compat] {
                let check = membrane.check(p, 32, mode);
                assert!(!check.permitted(mode), "{mode:?}: {check:?}");
            }
        }
    }

    #[test]
    fn mismatch_reports_both_tags() {
        let membrane = TagMembrane::with_seed(25);
        let p = membrane.allocate(16).expect("allocation should succeed");
        let forged = p.with_tag(p.tag().next());
        assert_eq!(
            membrane.check(forged, 16, CheckMode::Compat),
            TagCheck::Mismatch {
                raw: p.raw(),
                pointer_tag: forged.tag(),
                shadow_tag: p.tag(),
            }
        );
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn strict_mode_resolves_interior_pointers() {
        let membrane = TagMembrane::with_seed(27);
        let p = membrane.allocate(64).expect("allocation should succeed");
        let interior = TaggedPtr::new(p.raw() + 16, p.tag());

        assert_eq!(
            membrane.check(interior, 48, CheckMode::Strict),
            TagCheck::Match {
                base: p.raw(),
                tag: p.tag()
            }
        );
        assert_eq!(
            membrane.check(interior, 49, CheckMode::Strict),
            TagCheck::OutOfBounds {
                raw: p.raw() + 16,
                len: 49,
                base: p.raw(),
                block_len: 64,
            }
        );
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn compat_mode_ignores_extent() {
        let membrane = TagMembrane::with_seed(29);
        let p = membrane.allocate(8).expect("allocation should succeed");
        let check = membrane.check(p, 4096, CheckMode::Compat);
        assert!(check.permitted(CheckMode::Compat));
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn span_overflow_is_out_of_bounds() {
        let membrane = TagMembrane::with_seed(31);
        let p = membrane.allocate(8).expect("allocation should succeed");
        let check = membrane.check(p, usize::MAX, CheckMode::Strict);
        assert!(matches!(check, TagCheck::OutOfBounds { .. }));
        membrane.release(p).expect("release should succeed");
    }

    #[test]
    fn off_mode_permits_anything() {
        let membrane = TagMembrane::with_seed(33);
        let ptr = TaggedPtr::new(0xDEAD_0000, tag(9));
        let check = membrane.check(ptr, 1, CheckMode::Off);
        assert!(check.permitted(CheckMode::Off));
        assert_eq!(membrane.metrics().snapshot().validations, 0);
    }

    #[test]
    fn check_operand_returns_raw_or_violation() {
        let membrane = TagMembrane::with_seed(35);
        let p = membrane.allocate(32).expect("allocation should succeed");
        assert_eq!(
            membrane.check_operand("memcpy", Operand::Source, p, 32, CheckMode::Strict),
            Ok(p.raw())
        );

        membrane.force_shadow_tag(p.raw(), p.tag().next());
        let violation = membrane
            .check_operand("memcpy", Operand::Destination, p, 32, CheckMode::Strict)
            .expect_err("forced tag must be a violation");
        assert_eq!(violation.operand, Operand::Destination);
        assert_eq!(membrane.metrics().snapshot().violations, 1);
    }

    #[test]
    fn violation_renders_diagnostic_line() {
        let violation = TagViolation {
            operation: "memcpy",
            operand: Operand::Destination,
            ptr: TaggedPtr::new(0x1000, tag(3)),
            check: TagCheck::Mismatch {
                raw: 0x1000,
                pointer_tag: tag(3),
                shadow_tag: tag(4),
            },
        };
        assert_eq!(
            violation.to_string(),
            "softmte: tag mismatch in memcpy (dest): ptr=0x3000000000001000 \
             raw=0x1000 pointer_tag=0x3 shadow_tag=0x4"
        );
    }

    #[test]
    fn out_of_bounds_renders_block() {
        let violation = TagViolation {
            operation: "memset",
            operand: Operand::Destination,
            ptr: TaggedPtr::new(0x2010, tag(1)),
            check: TagCheck::OutOfBounds {
                raw: 0x2010,
                len: 64,
                base: 0x2000,
                block_len: 32,
            },
        };
        assert_eq!(
            violation.to_string(),
            "softmte: out-of-bounds access in memset (dest): ptr=0x1000000000002010 \
             raw=0x2010 len=64 block=0x2000+32"
        );
    }
}

//! Shadow tag table.
//!
//! Maps the raw base address of every live allocation to its authoritative
//! tag and length. An entry exists iff the block is live; only the allocator
//! creates and removes entries (plus the diagnostic override in test builds).
//! Outside this crate the table is read-only.
//!
//! Thread-safe via a single `parking_lot::Mutex`. Every method marks the
//! calling thread as inside the membrane for the duration of the lock.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use crate::codec::Tag;
use crate::error::ReleaseError;
use crate::reentry;

/// Maximum number of addresses whose last tag is remembered after release.
pub const RETIRED_MAX_ENTRIES: usize = 65_536;

/// Authoritative record for one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowEntry {
    pub tag: Tag,
    /// Block length in bytes; 0 when recorded without an extent.
    pub len: usize,
}

impl ShadowEntry {
    /// Returns true if `addr` falls inside the block starting at `base`.
    #[must_use]
    pub fn covers(&self, base: usize, addr: usize) -> bool {
        addr == base || (addr > base && addr - base < self.len)
    }
}

struct ShadowState {
    entries: BTreeMap<usize, ShadowEntry>,
    /// Tag each recently released address carried, for reuse diversification.
    retired: BTreeMap<usize, Tag>,
    /// Eviction order of `retired`; each address appears at most once.
    retired_order: VecDeque<usize>,
}

impl ShadowState {
    const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            retired: BTreeMap::new(),
            retired_order: VecDeque::new(),
        }
    }

    fn retire(&mut self, raw: usize, tag: Tag) {
        if self.retired.insert(raw, tag).is_none() {
            self.retired_order.push_back(raw);
        }
        while self.retired_order.len() > RETIRED_MAX_ENTRIES {
            let Some(oldest) = self.retired_order.pop_front() else {
                break;
            };
            self.retired.remove(&oldest);
        }
    }

    fn upsert_tag(&mut self, raw: usize, tag: Tag) {
        self.entries
            .entry(raw)
            .and_modify(|entry| entry.tag = tag)
            .or_insert(ShadowEntry { tag, len: 0 });
    }
}

/// Process- or membrane-scoped table of live allocation tags.
///
/// Entries can only be created through the allocator, so a release never
/// frees memory the membrane did not hand out:
///
/// ```compile_fail
/// use softmte_membrane::{Tag, TagMembrane};
///
/// let membrane = TagMembrane::new();
/// let foreign = Box::into_raw(Box::new([0_u8; 64])) as usize;
/// membrane.shadow().record_block(foreign, 64, Tag::from_nibble(3));
/// ```
pub struct ShadowTable {
    state: Mutex<ShadowState>,
}

impl ShadowTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(ShadowState::new()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ShadowState) -> R) -> R {
        let _inside = reentry::enter();
        let mut state = self.state.lock();
        f(&mut state)
    }

    /// Insert or overwrite the tag recorded for `raw`.
    ///
    /// An existing extent is kept; a new entry has no extent.
    #[cfg(any(test, feature = "testing"))]
    fn record(&self, raw: usize, tag: Tag) {
        self.with_state(|state| state.upsert_tag(raw, tag));
    }

    /// Insert or overwrite the entry for the block `[raw, raw + len)`.
    #[cfg(test)]
    fn record_block(&self, raw: usize, len: usize, tag: Tag) {
        self.with_state(|state| {
            state.entries.insert(raw, ShadowEntry { tag, len });
        });
    }

    /// Record a freshly obtained block, choosing its tag under the table lock.
    ///
    /// `pick` receives the tag `raw` carried when it was last released, if
    /// that is still remembered.
    pub(crate) fn record_fresh_block(
        &self,
        raw: usize,
        len: usize,
        pick: impl FnOnce(Option<Tag>) -> Tag,
    ) -> Tag {
        self.with_state(|state| {
            let tag = pick(state.retired.get(&raw).copied());
            state.entries.insert(raw, ShadowEntry { tag, len });
            tag
        })
    }

    /// The tag recorded for exactly `raw`, or `None` if no entry exists.
    #[must_use]
    pub fn lookup(&self, raw: usize) -> Option<Tag> {
        self.lookup_entry(raw).map(|entry| entry.tag)
    }

    #[must_use]
    pub fn lookup_entry(&self, raw: usize) -> Option<ShadowEntry> {
        self.with_state(|state| state.entries.get(&raw).copied())
    }

    /// The live block containing `addr`, as `(base, entry)`.
    #[must_use]
    pub fn lookup_containing(&self, addr: usize) -> Option<(usize, ShadowEntry)> {
        self.with_state(|state| {
            let (&base, &entry) = state.entries.range(..=addr).next_back()?;
            entry.covers(base, addr).then_some((base, entry))
        })
    }

    /// Delete the entry for `raw`. Removing an absent address is a no-op.
    #[cfg(test)]
    fn remove(&self, raw: usize) -> Option<ShadowEntry> {
        self.with_state(|state| {
            let entry = state.entries.remove(&raw)?;
            state.retire(raw, entry.tag);
            Some(entry)
        })
    }

    /// Delete the entry for `raw` only if it is recorded under `tag`.
    pub(crate) fn remove_matching(
        &self,
        raw: usize,
        tag: Tag,
    ) -> Result<ShadowEntry, ReleaseError> {
        self.with_state(|state| {
            let entry = *state
                .entries
                .get(&raw)
                .ok_or(ReleaseError::Untracked { raw })?;
            if entry.tag != tag {
                return Err(ReleaseError::TagMismatch {
                    raw,
                    pointer_tag: tag,
                    shadow_tag: entry.tag,
                });
            }
            state.entries.remove(&raw);
            state.retire(raw, entry.tag);
            Ok(entry)
        })
    }

    /// The tag `raw` carried when it was last released, if still remembered.
    #[must_use]
    pub fn retired_tag(&self, raw: usize) -> Option<Tag> {
        self.with_state(|state| state.retired.get(&raw).copied())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_state(|state| state.entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the shadow tag for `raw`, bypassing the allocator.
    ///
    /// Diagnostic-only: lets a scenario manufacture a tag mismatch.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn force_shadow_tag(&self, raw: usize, tag: Tag) {
        self.record(raw, tag);
    }
}

impl Default for ShadowTable {
    fn default() -> Self {
        Self::new()
    }
}

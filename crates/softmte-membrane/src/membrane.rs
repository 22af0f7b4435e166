//! The membrane facade.
//!
//! A [`TagMembrane`] owns one shadow table, one tag source and one set of
//! metrics. Every component that needs the table reaches it through the
//! membrane instance it was handed, so independent membranes never share
//! state. Process-wide interposition uses exactly one `static` instance (see
//! the ABI crate); it is const-initialised, lives as long as the process and
//! is never torn down.

use crate::codec::{self, Tag, TaggedPtr};
use crate::metrics::MembraneMetrics;
use crate::shadow::ShadowTable;
use crate::tag_source::TagSource;

/// Tagged allocator, validator and their shared state.
pub struct TagMembrane {
    pub(crate) shadow: ShadowTable,
    pub(crate) tags: TagSource,
    pub(crate) metrics: MembraneMetrics,
}

impl TagMembrane {
    /// A membrane whose tag source seeds itself from OS entropy.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_tag_source(TagSource::new())
    }

    /// A membrane with a deterministic tag sequence.
    #[must_use]
    pub const fn with_seed(seed: u64) -> Self {
        Self::with_tag_source(TagSource::with_seed(seed))
    }

    #[must_use]
    pub const fn with_tag_source(tags: TagSource) -> Self {
        Self {
            shadow: ShadowTable::new(),
            tags,
            metrics: MembraneMetrics::new(),
        }
    }

    /// The tag embedded in `ptr`.
    #[must_use]
    pub const fn extract_tag(ptr: TaggedPtr) -> Tag {
        codec::extract_tag(ptr.addr())
    }

    #[must_use]
    pub fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    #[must_use]
    pub fn tags(&self) -> &TagSource {
        &self.tags
    }

    #[must_use]
    pub fn metrics(&self) -> &MembraneMetrics {
        &self.metrics
    }

    /// Reseed the tag source.
    pub fn seed(&self, seed: u64) {
        self.tags.seed(seed);
    }

    /// Overwrite the shadow tag for `raw`, bypassing the allocator.
    ///
    /// Diagnostic-only: lets a scenario manufacture a tag mismatch.
    #[cfg(any(test, feature = "testing"))]
    pub fn force_shadow_tag(&self, raw: usize, tag: Tag) {
        MembraneMetrics::inc(&self.metrics.forced_tags);
        self.shadow.force_shadow_tag(raw, tag);
    }
}

impl Default for TagMembrane {
    fn default() -> Self {
        Self::new()
    }
}

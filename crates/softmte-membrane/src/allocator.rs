//! Tagged allocator.
//!
//! Blocks come from the system allocator with 16-byte alignment. A block and
//! its shadow entry are created together and destroyed together:
//! - allocate: obtain block, then record entry (tag chosen under the lock);
//! - release: remove entry, then free block.
//!
//! That ordering keeps "entry exists iff block live" true under concurrent
//! callers: an address can only be handed out again after its entry is gone.

#![allow(unsafe_code)]

use std::alloc::Layout;

use crate::codec::{TAG_MASK, TaggedPtr};
use crate::error::{AllocError, ReleaseError};
use crate::membrane::TagMembrane;
use crate::metrics::MembraneMetrics;

/// Alignment of every tagged block.
pub const BLOCK_ALIGN: usize = 16;

fn block_layout(size: usize) -> Result<Layout, AllocError> {
    Layout::from_size_align(size, BLOCK_ALIGN).map_err(|_| AllocError::SizeOverflow { size })
}

impl TagMembrane {
    /// Allocate `size` bytes and return a pointer tagged with a fresh tag.
    ///
    /// The tag differs from the one the same address carried at its last
    /// release, while that release is still remembered.
    pub fn allocate(&self, size: usize) -> Result<TaggedPtr, AllocError> {
        let result = self.allocate_inner(size);
        match result {
            Ok(_) => MembraneMetrics::inc(&self.metrics.allocations),
            Err(_) => MembraneMetrics::inc(&self.metrics.allocation_failures),
        }
        result
    }

    fn allocate_inner(&self, size: usize) -> Result<TaggedPtr, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let layout = block_layout(size)?;
        // SAFETY: layout has non-zero size.
        let block = unsafe { std::alloc::alloc(layout) };
        if block.is_null() {
            return Err(AllocError::OutOfMemory { size });
        }
        let raw = block as usize;
        if raw & TAG_MASK != 0 {
            // The payload cannot represent this address; give the block back.
            // SAFETY: block was just allocated with this layout.
            unsafe { std::alloc::dealloc(block, layout) };
            return Err(AllocError::OutOfMemory { size });
        }

        let tag = self.shadow.record_fresh_block(raw, size, |retired| {
            self.tags.generate_tag_excluding(retired)
        });
        Ok(TaggedPtr::new(raw, tag))
    }

    /// Release a block obtained from [`TagMembrane::allocate`].
    ///
    /// Refuses, without freeing anything, pointers whose raw address has no
    /// live entry (double free, foreign pointer) and pointers whose tag
    /// differs from the recorded one (stale pointer to a reused block).
    /// Returns the length of the freed block.
    pub fn release(&self, ptr: TaggedPtr) -> Result<usize, ReleaseError> {
        let raw = ptr.raw();
        let entry = match self.shadow.remove_matching(raw, ptr.tag()) {
            Ok(entry) => entry,
            Err(err) => {
                MembraneMetrics::inc(&self.metrics.rejected_releases);
                return Err(err);
            }
        };

        // Every entry with a block behind it was recorded with its size, and
        // that size formed a valid layout at allocation time.
        if let Ok(layout) = block_layout(entry.len) {
            if entry.len > 0 {
                // SAFETY: raw was returned by `alloc` with this layout and its
                // entry has just been removed, so no other release can reach it.
                unsafe { std::alloc::dealloc(raw as *mut u8, layout) };
            }
        }
        MembraneMetrics::inc(&self.metrics.releases);
        Ok(entry.len)
    }
}

//! Pointer tag codec.
//!
//! A tagged pointer is an address-sized integer whose top nibble (bits 60..63)
//! holds the tag and whose low 60 bits hold the raw address:
//!
//! ```text
//! 63    60 59                                                     0
//! ├───────┼────────────────────────────────────────────────────────┤
//! │  TAG  │                   raw address                          │
//! └───────┴────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function here is a total, constant-time bit operation.

use std::fmt;

/// Bit position of the tag nibble.
pub const TAG_SHIFT: u32 = 60;

/// Mask selecting the tag nibble of a tagged value.
pub const TAG_MASK: usize = 0xF000_0000_0000_0000;

/// Mask selecting the raw-address payload of a tagged value.
pub const ADDR_MASK: usize = 0x0FFF_FFFF_FFFF_FFFF;

/// Number of distinct tag values.
pub const TAG_COUNT: u8 = 16;

/// A 4-bit memory tag. The wrapped value is always `<= 0xF`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u8);

impl Tag {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(TAG_COUNT - 1);

    /// Returns `None` for values that do not fit in a nibble.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value < TAG_COUNT {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Keeps only the low nibble of `value`.
    #[must_use]
    pub const fn from_nibble(value: u8) -> Self {
        Self(value & 0xF)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The next tag, wrapping from 0xF back to 0x0.
    #[must_use]
    pub const fn next(self) -> Self {
        Self::from_nibble(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Set the top nibble of `raw_address` to `tag`.
///
/// Bits of `raw_address` above the 60-bit payload are discarded.
#[inline]
#[must_use]
pub const fn embed(raw_address: usize, tag: Tag) -> usize {
    (raw_address & ADDR_MASK) | ((tag.0 as usize) << TAG_SHIFT)
}

/// Return the tag stored in the top nibble of `tagged`.
#[inline]
#[must_use]
pub const fn extract_tag(tagged: usize) -> Tag {
    Tag(((tagged & TAG_MASK) >> TAG_SHIFT) as u8)
}

/// Return the raw (untagged) address of `tagged`.
#[inline]
#[must_use]
pub const fn strip(tagged: usize) -> usize {
    tagged & ADDR_MASK
}

/// A pointer value carrying a tag in its top nibble.
///
/// Dereferencing the tagged value directly is never valid on current
/// hardware; use [`TaggedPtr::raw`] (after validation) for actual access.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaggedPtr(usize);

impl TaggedPtr {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn new(raw_address: usize, tag: Tag) -> Self {
        Self(embed(raw_address, tag))
    }

    /// Reinterpret an address-sized integer as a tagged pointer.
    #[must_use]
    pub const fn from_addr(tagged: usize) -> Self {
        Self(tagged)
    }

    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    #[must_use]
    pub const fn tag(self) -> Tag {
        extract_tag(self.0)
    }

    #[must_use]
    pub const fn raw(self) -> usize {
        strip(self.0)
    }

    /// The full tagged value.
    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn with_tag(self, tag: Tag) -> Self {
        Self::new(self.raw(), tag)
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The tagged value as a pointer, for handing across the C ABI.
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// The raw address as a pointer, usable for actual memory access.
    #[must_use]
    pub fn raw_ptr<T>(self) -> *mut T {
        self.raw() as *mut T
    }
}

impl fmt::Debug for TaggedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("tag", &self.tag())
            .field("raw", &format_args!("{:#x}", self.raw()))
            .finish()
    }
}

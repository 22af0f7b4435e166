//! Pseudo-random tag generation.
//!
//! Four bits give 16 tags. Tag 0 is what every untracked pointer carries, so
//! it is never handed out: allocations draw from the 15 tags `1..=15`, and a
//! pointer into released memory can always be told apart from foreign memory.
//! Detection is otherwise probabilistic:
//! - a forged pointer carrying an arbitrary tag matches with probability 1/16
//!   (it may also pick 0, which no live block has);
//! - a stale pointer to an address that was released and immediately reused
//!   never matches, because the allocator excludes the address's retired tag;
//! - once the retired record has been evicted, reuse matches with
//!   probability 1/15.

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::codec::{TAG_COUNT, Tag};
use crate::config::env_tag_seed;

/// Smallest tag an allocation can carry.
const LOWEST_TAG: u8 = 1;

/// Where an unseeded source takes its initial state from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedPolicy {
    Entropy,
    Fixed(u64),
    /// `SOFTMTE_TAG_SEED` if set, entropy otherwise.
    Environment,
}

/// Shared pseudo-random tag source.
pub struct TagSource {
    rng: Mutex<Option<SmallRng>>,
    policy: SeedPolicy,
}

impl TagSource {
    /// A source seeded from OS entropy on first use.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_policy(SeedPolicy::Entropy)
    }

    /// A source with a fixed initial seed.
    #[must_use]
    pub const fn with_seed(seed: u64) -> Self {
        Self::with_policy(SeedPolicy::Fixed(seed))
    }

    /// A source that consults `SOFTMTE_TAG_SEED` on first use.
    #[must_use]
    pub const fn from_env() -> Self {
        Self::with_policy(SeedPolicy::Environment)
    }

    const fn with_policy(policy: SeedPolicy) -> Self {
        Self {
            rng: parking_lot::const_mutex(None),
            policy,
        }
    }

    /// Reseed deterministically. Later tags depend only on `seed`.
    pub fn seed(&self, seed: u64) {
        *self.rng.lock() = Some(SmallRng::seed_from_u64(seed));
    }

    /// A tag in `[1, 15]`.
    pub fn generate_tag(&self) -> Tag {
        self.with_rng(|rng| Tag::from_nibble(rng.gen_range(LOWEST_TAG..TAG_COUNT)))
    }

    /// A tag in `[1, 15]` other than `excluded`, uniform over the rest.
    pub fn generate_tag_excluding(&self, excluded: Option<Tag>) -> Tag {
        let Some(excluded) = excluded.filter(|tag| *tag != Tag::ZERO) else {
            return self.generate_tag();
        };
        self.with_rng(|rng| {
            let pick = rng.gen_range(LOWEST_TAG..TAG_COUNT - 1);
            let pick = if pick >= excluded.get() { pick + 1 } else { pick };
            Tag::from_nibble(pick)
        })
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut SmallRng) -> R) -> R {
        let mut slot = self.rng.lock();
        let rng = slot.get_or_insert_with(|| self.initial_rng());
        f(rng)
    }

    fn initial_rng(&self) -> SmallRng {
        let seed = match self.policy {
            SeedPolicy::Entropy => None,
            SeedPolicy::Fixed(seed) => Some(seed),
            SeedPolicy::Environment => env_tag_seed(),
        };
        match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        }
    }
}

impl Default for TagSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_stay_in_nibble_range_and_skip_zero() {
        let source = TagSource::new();
        for _ in 0..1_000 {
            let tag = source.generate_tag().get();
            assert!((LOWEST_TAG..TAG_COUNT).contains(&tag), "tag {tag}");
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = TagSource::with_seed(7);
        let b = TagSource::new();
        b.seed(7);
        let left: Vec<Tag> = (0..64).map(|_| a.generate_tag()).collect();
        let right: Vec<Tag> = (0..64).map(|_| b.generate_tag()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn excluded_tag_is_never_produced() {
        let source = TagSource::with_seed(0x5EED);
        for value in 0..TAG_COUNT {
            let excluded = Tag::from_nibble(value);
            for _ in 0..256 {
                let tag = source.generate_tag_excluding(Some(excluded));
                assert_ne!(tag, excluded);
                assert_ne!(tag, Tag::ZERO);
            }
        }
    }

    #[test]
    fn every_nonzero_tag_eventually_appears() {
        let source = TagSource::with_seed(1);
        let mut seen = [false; TAG_COUNT as usize];
        for _ in 0..4_096 {
            seen[source.generate_tag().get() as usize] = true;
        }
        assert!(!seen[0]);
        assert!(seen[1..].iter().all(|s| *s), "seen: {seen:?}");
    }

    #[test]
    fn exclusion_covers_remaining_fourteen_tags() {
        let source = TagSource::with_seed(2);
        let excluded = Tag::from_nibble(9);
        let mut seen = [false; TAG_COUNT as usize];
        for _ in 0..4_096 {
            seen[source.generate_tag_excluding(Some(excluded)).get() as usize] = true;
        }
        for (value, hit) in seen.iter().enumerate() {
            assert_eq!(*hit, value != 0 && value != 9, "tag {value}");
        }
    }

    #[test]
    fn excluding_zero_draws_from_all_fifteen() {
        let source = TagSource::with_seed(3);
        let mut seen = [false; TAG_COUNT as usize];
        for _ in 0..4_096 {
            seen[source.generate_tag_excluding(Some(Tag::ZERO)).get() as usize] = true;
        }
        assert!(!seen[0]);
        assert!(seen[1..].iter().all(|s| *s), "seen: {seen:?}");
    }
}

//! Runtime check-mode configuration.
//!
//! The mode is set via the `SOFTMTE_MODE` environment variable:
//! - `strict` (default): tagged pointers must match a live shadow entry;
//!   interior pointers resolve to their containing block and the accessed
//!   span must stay inside it. Untagged pointers to untracked memory pass.
//! - `compat`: exact-address lookups only, an absent entry reads as tag 0,
//!   no extent check. Mirrors the minimal soft-MTE semantics.
//! - `off`: no validation. Pure passthrough for benchmarking baseline.
//!
//! `SOFTMTE_TAG_SEED` (decimal or `0x` hex) seeds the global tag source on
//! first use.

use std::str::FromStr;

use crate::error::ModeParseError;
use crate::resolve::{Claim, ResolveOnce};

/// Name of the environment variable selecting the check mode.
pub const MODE_ENV: &str = "SOFTMTE_MODE";

/// Name of the environment variable seeding the global tag source.
pub const TAG_SEED_ENV: &str = "SOFTMTE_TAG_SEED";

/// How the bulk-memory gate checks its pointer operands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// Extent-aware validation; absent entries are never a match.
    #[default]
    Strict,
    /// Exact-address validation; absent entries read as tag 0.
    Compat,
    /// No validation.
    Off,
}

impl CheckMode {
    /// Parse from string (case-insensitive), falling back to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Returns true if the gate validates operands at all.
    #[must_use]
    pub const fn validation_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns true if interior pointers and access extents are checked.
    #[must_use]
    pub const fn extent_aware(self) -> bool {
        matches!(self, Self::Strict)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Compat => "compat",
            Self::Off => "off",
        }
    }
}

impl FromStr for CheckMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "default" | "full" => Ok(Self::Strict),
            "compat" | "legacy" | "original" => Ok(Self::Compat),
            "off" | "none" | "disabled" | "passthrough" => Ok(Self::Off),
            _ => Err(ModeParseError(s.to_string())),
        }
    }
}

static CACHED_MODE: ResolveOnce = ResolveOnce::new();

const MODE_STRICT: u8 = 1;
const MODE_COMPAT: u8 = 2;
const MODE_OFF: u8 = 3;

impl CheckMode {
    const fn to_cached(self) -> u8 {
        match self {
            Self::Strict => MODE_STRICT,
            Self::Compat => MODE_COMPAT,
            Self::Off => MODE_OFF,
        }
    }

    const fn from_cached(value: u8) -> Self {
        match value {
            MODE_COMPAT => Self::Compat,
            MODE_OFF => Self::Off,
            _ => Self::Strict,
        }
    }
}

/// The configured check mode, read from `SOFTMTE_MODE` once per process.
///
/// Reading the environment can copy memory, so a call that arrives while
/// the variable is being read gets `Strict` instead of waiting.
#[must_use]
pub fn check_mode() -> CheckMode {
    match CACHED_MODE.claim() {
        Claim::Resolved(value) => CheckMode::from_cached(value),
        Claim::Busy => CheckMode::Strict,
        Claim::Won => {
            let mode = std::env::var(MODE_ENV)
                .map(|v| CheckMode::from_str_loose(&v))
                .unwrap_or_default();
            CACHED_MODE.publish(mode.to_cached());
            mode
        }
    }
}

/// Parse a seed in decimal or `0x`-prefixed hex, ignoring `_` separators.
#[must_use]
pub fn parse_seed(raw: &str) -> Option<u64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '_').collect();
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => cleaned.parse().ok(),
    }
}

/// Seed requested through `SOFTMTE_TAG_SEED`, if set and well-formed.
#[must_use]
pub fn env_tag_seed() -> Option<u64> {
    std::env::var(TAG_SEED_ENV).ok().as_deref().and_then(parse_seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cache tests rewrite the process-wide cache.
    static CACHE_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn parse_check_modes() {
        assert_eq!(CheckMode::from_str_loose("strict"), CheckMode::Strict);
        assert_eq!(CheckMode::from_str_loose("STRICT"), CheckMode::Strict);
        assert_eq!(CheckMode::from_str_loose("compat"), CheckMode::Compat);
        assert_eq!(CheckMode::from_str_loose("legacy"), CheckMode::Compat);
        assert_eq!(CheckMode::from_str_loose("off"), CheckMode::Off);
        assert_eq!(CheckMode::from_str_loose(" passthrough "), CheckMode::Off);
        assert_eq!(CheckMode::from_str_loose("bogus"), CheckMode::Strict);
    }

    #[test]
    fn strict_parse_reports_unknown_modes() {
        assert_eq!("compat".parse::<CheckMode>(), Ok(CheckMode::Compat));
        assert_eq!(
            "bogus".parse::<CheckMode>(),
            Err(ModeParseError("bogus".into()))
        );
    }

    #[test]
    fn mode_capabilities() {
        assert!(CheckMode::Strict.validation_enabled());
        assert!(CheckMode::Compat.validation_enabled());
        assert!(!CheckMode::Off.validation_enabled());
        assert!(CheckMode::Strict.extent_aware());
        assert!(!CheckMode::Compat.extent_aware());
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in [CheckMode::Strict, CheckMode::Compat, CheckMode::Off] {
            assert_eq!(mode.as_str().parse::<CheckMode>(), Ok(mode));
        }
    }

    #[test]
    fn seeds_parse_in_decimal_and_hex() {
        assert_eq!(parse_seed("42"), Some(42));
        assert_eq!(parse_seed("0xDEAD_BEEF"), Some(0xDEAD_BEEF));
        assert_eq!(parse_seed("0Xff"), Some(255));
        assert_eq!(parse_seed("seed"), None);
    }

    #[test]
    fn cached_mode_is_process_sticky_until_cache_reset() {
        let _guard = CACHE_LOCK.lock();
        let previous = CACHED_MODE.replace_raw(MODE_COMPAT);
        assert_eq!(check_mode(), CheckMode::Compat);

        CACHED_MODE.replace_raw(MODE_OFF);
        assert_eq!(check_mode(), CheckMode::Off);

        CACHED_MODE.replace_raw(previous);
    }

    #[test]
    fn resolving_state_returns_strict_safe_default() {
        let _guard = CACHE_LOCK.lock();
        let previous = CACHED_MODE.replace_raw(ResolveOnce::RESOLVING_RAW);
        assert_eq!(check_mode(), CheckMode::Strict);
        CACHED_MODE.replace_raw(previous);
    }

    #[test]
    fn cached_encoding_round_trips() {
        for mode in [CheckMode::Strict, CheckMode::Compat, CheckMode::Off] {
            assert_eq!(CheckMode::from_cached(mode.to_cached()), mode);
        }
    }
}

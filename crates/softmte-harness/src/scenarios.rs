//! Named scenarios driven through the C entry points.
//!
//! A scenario either completes (and reports what it observed) or is expected
//! to end the process through the gate's abort. Aborting scenarios must run in
//! a child process; see [`crate::isolation`].

use std::ffi::c_void;

use serde_json::json;
use softmte::tag_abi::{
    softmte_force_shadow_tag, softmte_free, softmte_malloc, softmte_memcpy, softmte_memset,
    softmte_pointer_tag, softmte_shadow_tag, softmte_validate,
};
use softmte_membrane::{CheckMode, codec};

use crate::error::HarnessError;

/// How a scenario is expected to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Returns normally with a report.
    Completes,
    /// Terminates abnormally via `abort()` inside the gate.
    Aborts,
}

impl Expectation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completes => "completes",
            Self::Aborts => "aborts",
        }
    }
}

/// What a completed scenario observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub details: serde_json::Value,
}

/// A named scenario.
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub expectation: Expectation,
    /// Only meaningful when the gate checks extents.
    pub needs_extent_checks: bool,
    run: fn() -> Result<ScenarioReport, HarnessError>,
}

impl Scenario {
    /// Whether the scenario's expectation holds under `SOFTMTE_MODE=mode`.
    ///
    /// The `softmte_*` entry points validate strictly even when the mode is
    /// `off`, so only `compat` drops extent checks.
    #[must_use]
    pub fn applies_to(&self, mode: CheckMode) -> bool {
        !self.needs_extent_checks || mode != CheckMode::Compat
    }

    /// Run in the current process. Aborting scenarios do not return.
    pub fn run(&self) -> Result<ScenarioReport, HarnessError> {
        (self.run)()
    }
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "valid-copy",
        description: "copy between two live blocks with their own tags",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: valid_copy,
    },
    Scenario {
        name: "valid-fill",
        description: "fill a live block through its tagged pointer",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: valid_fill,
    },
    Scenario {
        name: "foreign-copy",
        description: "copy between untagged stack buffers the membrane does not track",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: foreign_copy,
    },
    Scenario {
        name: "zero-length",
        description: "zero-length copy and fill on valid operands",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: zero_length,
    },
    Scenario {
        name: "forged-pointer",
        description: "a block's address under any other tag fails validation",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: forged_pointer,
    },
    Scenario {
        name: "release-checks",
        description: "double, stale and NULL releases",
        expectation: Expectation::Completes,
        needs_extent_checks: false,
        run: release_checks,
    },
    Scenario {
        name: "mismatched-copy",
        description: "copy into a block whose shadow tag was overwritten",
        expectation: Expectation::Aborts,
        needs_extent_checks: false,
        run: mismatched_copy,
    },
    Scenario {
        name: "mismatched-fill",
        description: "fill a block whose shadow tag was overwritten",
        expectation: Expectation::Aborts,
        needs_extent_checks: false,
        run: mismatched_fill,
    },
    Scenario {
        name: "forged-copy",
        description: "copy out of a live block through a pointer carrying the wrong tag",
        expectation: Expectation::Aborts,
        needs_extent_checks: false,
        run: forged_copy,
    },
    Scenario {
        name: "overrun-copy",
        description: "copy one byte past the end of the source block (strict mode)",
        expectation: Expectation::Aborts,
        needs_extent_checks: true,
        run: overrun_copy,
    },
];

/// Look up a scenario by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

fn alloc(size: usize) -> Result<*mut c_void, HarnessError> {
    let ptr = softmte_malloc(size);
    if ptr.is_null() {
        Err(HarnessError::AllocationFailed { size })
    } else {
        Ok(ptr)
    }
}

fn raw_of(ptr: *const c_void) -> usize {
    codec::strip(ptr as usize)
}

fn other_tag(ptr: *const c_void) -> u8 {
    (softmte_pointer_tag(ptr) + 1) & 0xF
}

fn ensure(scenario: &'static str, cond: bool, reason: &str) -> Result<(), HarnessError> {
    if cond {
        Ok(())
    } else {
        Err(HarnessError::ScenarioFailed {
            scenario,
            reason: reason.to_string(),
        })
    }
}

fn survived(scenario: &'static str) -> Result<ScenarioReport, HarnessError> {
    Err(HarnessError::ScenarioFailed {
        scenario,
        reason: "gate returned instead of aborting".to_string(),
    })
}

fn valid_copy() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "valid-copy";
    let src = alloc(64)?;
    let dst = alloc(64)?;
    ensure(NAME, raw_of(src) != raw_of(dst), "blocks share an address")?;

    // SAFETY: both blocks are 64 bytes.
    let ret = unsafe {
        softmte_memset(src, 0xA5, 64);
        softmte_memcpy(dst, src, 64)
    };
    // SAFETY: ret is the raw address of a live 64-byte block.
    let copied = unsafe { std::slice::from_raw_parts(ret as *const u8, 64) };
    ensure(NAME, ret as usize == raw_of(dst), "return is not the raw dest")?;
    ensure(NAME, copied.iter().all(|b| *b == 0xA5), "bytes differ")?;

    let details = json!({
        "src_tag": softmte_pointer_tag(src),
        "dst_tag": softmte_pointer_tag(dst),
        "bytes": 64,
    });
    ensure(NAME, softmte_free(src) == 0, "release of src refused")?;
    ensure(NAME, softmte_free(dst) == 0, "release of dst refused")?;
    Ok(ScenarioReport { details })
}

fn valid_fill() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "valid-fill";
    let p = alloc(128)?;
    // SAFETY: p is 128 bytes.
    let ret = unsafe { softmte_memset(p, 0x17, 128) };
    // SAFETY: ret is the raw address of a live 128-byte block.
    let filled = unsafe { std::slice::from_raw_parts(ret as *const u8, 128) };
    ensure(NAME, filled.iter().all(|b| *b == 0x17), "fill incomplete")?;
    let details = json!({ "tag": softmte_pointer_tag(p), "bytes": 128 });
    ensure(NAME, softmte_free(p) == 0, "release refused")?;
    Ok(ScenarioReport { details })
}

fn foreign_copy() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "foreign-copy";
    let src = *b"untracked stack bytes";
    let mut dst = [0_u8; 21];
    // SAFETY: distinct 21-byte stack buffers.
    unsafe { softmte_memcpy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), src.len()) };
    ensure(NAME, dst == src, "bytes differ")?;
    Ok(ScenarioReport {
        details: json!({ "bytes": src.len() }),
    })
}

fn zero_length() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "zero-length";
    let p = alloc(16)?;
    // SAFETY: zero-length calls touch no memory.
    let (copy_ret, fill_ret) = unsafe { (softmte_memcpy(p, p, 0), softmte_memset(p, 0, 0)) };
    ensure(NAME, copy_ret as usize == raw_of(p), "copy return")?;
    ensure(NAME, fill_ret as usize == raw_of(p), "fill return")?;
    ensure(NAME, softmte_free(p) == 0, "release refused")?;
    Ok(ScenarioReport {
        details: json!({ "raw": format!("{:#x}", raw_of(p)) }),
    })
}

fn forged_pointer() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "forged-pointer";
    let p1 = alloc(64)?;
    let p2 = alloc(64)?;
    let t1 = softmte_pointer_tag(p1);
    let t2 = softmte_pointer_tag(p2);
    ensure(NAME, t1 <= 0xF && t2 <= 0xF, "tag out of range")?;
    ensure(NAME, softmte_validate(p1) == 1, "p1 does not validate")?;

    let mut rejected = 0;
    for tag in (0..16_u8).filter(|t| *t != t1) {
        let forged = codec::embed(raw_of(p1), softmte_membrane::Tag::from_nibble(tag));
        ensure(
            NAME,
            softmte_validate(forged as *const c_void) == 0,
            "forged tag validated",
        )?;
        rejected += 1;
    }
    let details = json!({
        "t1": t1,
        "t2": t2,
        "forged_rejected": rejected,
        "shadow_t1": softmte_shadow_tag(p1),
    });
    ensure(NAME, softmte_free(p1) == 0, "release of p1 refused")?;
    ensure(NAME, softmte_free(p2) == 0, "release of p2 refused")?;
    Ok(ScenarioReport { details })
}

fn release_checks() -> Result<ScenarioReport, HarnessError> {
    const NAME: &str = "release-checks";
    ensure(NAME, softmte_free(std::ptr::null_mut()) == 0, "NULL release")?;

    let p = alloc(32)?;
    let stale = codec::embed(raw_of(p), softmte_membrane::Tag::from_nibble(other_tag(p)));
    ensure(
        NAME,
        softmte_free(stale as *mut c_void) == -1,
        "stale-tag release accepted",
    )?;
    ensure(NAME, softmte_validate(p) == 1, "refused release disturbed block")?;
    ensure(NAME, softmte_free(p) == 0, "release refused")?;
    ensure(NAME, softmte_free(p) == -1, "double release accepted")?;
    ensure(NAME, softmte_shadow_tag(p) == -1, "entry survived release")?;
    Ok(ScenarioReport {
        details: json!({ "released_tag": softmte_pointer_tag(p) }),
    })
}

fn mismatched_copy() -> Result<ScenarioReport, HarnessError> {
    let src = alloc(64)?;
    let dst = alloc(64)?;
    softmte_force_shadow_tag(raw_of(dst), other_tag(dst));
    // SAFETY: both blocks are 64 bytes; the gate aborts before touching them.
    unsafe { softmte_memcpy(dst, src, 64) };
    survived("mismatched-copy")
}

fn mismatched_fill() -> Result<ScenarioReport, HarnessError> {
    let p = alloc(64)?;
    softmte_force_shadow_tag(raw_of(p), other_tag(p));
    // SAFETY: p is 64 bytes; the gate aborts before touching it.
    unsafe { softmte_memset(p, 0, 64) };
    survived("mismatched-fill")
}

fn forged_copy() -> Result<ScenarioReport, HarnessError> {
    let src = alloc(64)?;
    let mut out = [0_u8; 64];
    let forged = codec::embed(raw_of(src), softmte_membrane::Tag::from_nibble(other_tag(src)));
    // SAFETY: 64-byte block and buffer; the gate aborts before touching them.
    unsafe { softmte_memcpy(out.as_mut_ptr().cast(), forged as *const c_void, 64) };
    survived("forged-copy")
}

fn overrun_copy() -> Result<ScenarioReport, HarnessError> {
    let src = alloc(64)?;
    let dst = alloc(128)?;
    // SAFETY: the gate rejects the 65-byte read before any byte is copied.
    unsafe { softmte_memcpy(dst, src, 65) };
    survived("overrun-copy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_names_are_unique() {
        let mut names: Vec<_> = SCENARIOS.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCENARIOS.len());
    }

    #[test]
    fn find_by_name() {
        assert_eq!(
            find("mismatched-copy").map(|s| s.expectation),
            Some(Expectation::Aborts)
        );
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn extent_scenarios_are_skipped_in_compat_mode() {
        let overrun = find("overrun-copy").expect("overrun-copy");
        assert!(overrun.applies_to(CheckMode::Strict));
        assert!(overrun.applies_to(CheckMode::Off));
        assert!(!overrun.applies_to(CheckMode::Compat));
        let valid = find("valid-copy").expect("valid-copy");
        assert!(valid.applies_to(CheckMode::Compat));
    }

    #[test]
    fn completing_scenarios_pass_in_process() {
        for scenario in SCENARIOS
            .iter()
            .filter(|s| s.expectation == Expectation::Completes)
        {
            let report = scenario
                .run()
                .unwrap_or_else(|e| panic!("{}: {e}", scenario.name));
            assert!(report.details.is_object(), "{}", scenario.name);
        }
    }
}

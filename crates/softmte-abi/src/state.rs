//! Process-wide membrane instance.
//!
//! Const-initialised: there is no init race to lose and nothing to tear
//! down, which matters because the first `memcpy` in a preloaded process can
//! arrive before `main` and the last one after every destructor has run.

use softmte_membrane::{CheckMode, TagMembrane, TagSource, check_mode};

static MEMBRANE: TagMembrane = TagMembrane::with_tag_source(TagSource::from_env());

/// The membrane behind every exported symbol.
#[inline]
pub fn membrane() -> &'static TagMembrane {
    &MEMBRANE
}

/// Mode used by entry points that always validate.
///
/// Follows `SOFTMTE_MODE` except that `off` still validates (strictly).
#[inline]
pub(crate) fn validating_mode() -> CheckMode {
    match check_mode() {
        CheckMode::Off => CheckMode::Strict,
        mode => mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membrane_is_a_single_instance() {
        assert!(std::ptr::eq(membrane(), membrane()));
    }

    #[test]
    fn validating_mode_never_disables_checks() {
        assert!(validating_mode().validation_enabled());
    }
}

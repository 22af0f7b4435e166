//! Software memory-tagging membrane.
//!
//! Emulates pointer tagging without hardware support: every allocation handed
//! out by the membrane carries a 4-bit tag in the top nibble of its address,
//! the authoritative tag lives in an out-of-band shadow table, and bulk memory
//! operations compare the two before touching memory.
//!
//! # Architecture
//!
//! The membrane consists of:
//! - **Tag codec** (`codec`): embed/extract/strip the top-nibble tag
//! - **Tag source** (`tag_source`): seeded pseudo-random tag generation
//! - **Shadow table** (`shadow`): raw address -> live allocation entry
//! - **Tagged allocator** (`allocator`): allocate/release with table upkeep
//! - **Validator** (`validator`): tag comparison and gate access checks
//! - **Membrane** (`membrane`): the facade owning all of the above
//! - **Reentry guard** (`reentry`): per-thread "inside the membrane" marker
//! - **Configuration** (`config`): runtime check mode control
//! - **Resolve-once** (`resolve`): non-blocking process-wide lazy state
//! - **Metrics** (`metrics`): atomic counters for observability

#![deny(unsafe_code)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("softmte stores tags in the top nibble of a 64-bit address");

pub mod allocator;
pub mod codec;
pub mod config;
pub mod error;
pub mod membrane;
pub mod metrics;
pub mod reentry;
pub mod resolve;
pub mod shadow;
pub mod tag_source;
pub mod validator;

pub use codec::{Tag, TaggedPtr};
pub use config::{CheckMode, check_mode};
pub use error::{AllocError, ModeParseError, ReleaseError};
pub use membrane::TagMembrane;
pub use metrics::{MembraneMetrics, MetricsSnapshot};
pub use resolve::{Claim, ResolveOnce};
pub use shadow::{ShadowEntry, ShadowTable};
pub use tag_source::TagSource;
pub use validator::{Operand, TagCheck, TagViolation};

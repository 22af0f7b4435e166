//! Scenario harness for softmte.
//!
//! This crate provides:
//! - Scenarios: named end-to-end exercises of the allocator and the gate,
//!   each with an expected termination (completes or aborts)
//! - Isolation: runs a scenario in a child process and judges how it ended
//! - Preload cases: plain `memcpy`/`memset` under the interposing library
//! - Structured logging: one JSONL record per scenario run

pub mod error;
pub mod isolation;
#[cfg(target_os = "linux")]
pub mod preload;
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use isolation::{ChildTermination, run_isolated};
pub use scenarios::{Expectation, SCENARIOS, Scenario, ScenarioReport};

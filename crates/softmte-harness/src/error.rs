//! Harness errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),
    #[error("scenario `{scenario}` failed: {reason}")]
    ScenarioFailed {
        scenario: &'static str,
        reason: String,
    },
    #[error("softmte_malloc({size}) returned NULL")]
    AllocationFailed { size: usize },
    #[error("preloaded library unavailable: {0}")]
    Preload(String),
    #[error("failed to spawn scenario child: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

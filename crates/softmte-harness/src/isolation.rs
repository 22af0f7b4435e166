//! Child-process isolation.
//!
//! The gate reports a violation by aborting, which cannot be caught or
//! unwound. Each scenario therefore runs as `<exe> run <name>` in its own
//! process, with `SOFTMTE_MODE` set explicitly (the mode is cached per
//! process), and the parent judges how the child ended.

use std::path::Path;
use std::process::{Command, ExitStatus};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use softmte_membrane::CheckMode;
use softmte_membrane::config::MODE_ENV;

use crate::error::HarnessError;
use crate::scenarios::{Expectation, Scenario};

/// How a scenario child ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ChildTermination {
    /// Normal exit with this status code.
    Exited(i32),
    /// Killed by this signal (SIGABRT for a gate violation).
    Signaled(i32),
    /// Neither code nor signal available.
    Unknown,
}

impl ChildTermination {
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Unknown
    }

    /// Whether this termination is what `expectation` calls for.
    #[must_use]
    pub fn satisfies(&self, expectation: Expectation) -> bool {
        match expectation {
            Expectation::Completes => *self == Self::Exited(0),
            Expectation::Aborts => self.is_abort(),
        }
    }

    #[must_use]
    pub fn is_abort(&self) -> bool {
        #[cfg(unix)]
        {
            *self == Self::Signaled(libc::SIGABRT)
        }
        #[cfg(not(unix))]
        {
            !matches!(self, Self::Exited(0))
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled(signal) => Some(*signal),
            _ => None,
        }
    }
}

/// Result of one isolated run.
#[derive(Debug, Clone)]
pub struct IsolatedRun {
    pub termination: ChildTermination,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Run `scenario` in a child of `exe` under `mode`.
pub fn run_isolated(
    exe: &Path,
    scenario: &Scenario,
    mode: CheckMode,
) -> Result<IsolatedRun, HarnessError> {
    let mut command = Command::new(exe);
    command.arg("run").arg(scenario.name);
    run_child(command, mode)
}

/// Run `program args..` under `mode` with `library` preloaded.
#[cfg(target_os = "linux")]
pub fn run_preloaded<S: AsRef<std::ffi::OsStr>>(
    library: &Path,
    program: impl AsRef<std::ffi::OsStr>,
    args: &[S],
    mode: CheckMode,
) -> Result<IsolatedRun, HarnessError> {
    let mut command = Command::new(program);
    command.args(args).env(crate::preload::PRELOAD_ENV, library);
    run_child(command, mode)
}

fn run_child(mut command: Command, mode: CheckMode) -> Result<IsolatedRun, HarnessError> {
    let started = Instant::now();
    let output = command
        .env(MODE_ENV, mode.as_str())
        .output()
        .map_err(HarnessError::Spawn)?;
    Ok(IsolatedRun {
        termination: ChildTermination::from_status(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

//! JSONL records for suite runs.
//!
//! Each scenario the suite considers produces one [`ScenarioRecord`] line.
//! [`JsonlLog`] numbers the records with `softmte::<run-id>::<seq>` trace ids,
//! and [`parse_line`] reads a line back with the same checks CI applies.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use softmte_membrane::CheckMode;
use thiserror::Error;

use crate::isolation::{ChildTermination, IsolatedRun};
use crate::scenarios::Scenario;

pub const TRACE_PREFIX: &str = "softmte::";

/// Fields every line must carry before it is deserialized.
const REQUIRED: [&str; 7] = [
    "timestamp",
    "trace_id",
    "level",
    "scenario",
    "mode",
    "expected",
    "outcome",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Error,
}

/// The harness's verdict on one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The child ended the way the scenario expects.
    Pass,
    Fail,
    /// Not applicable in this mode; no child was started.
    Skip,
    /// The child could not be started.
    Error,
}

impl Outcome {
    const fn level(self) -> Level {
        match self {
            Self::Pass | Self::Skip => Level::Info,
            Self::Fail | Self::Error => Level::Error,
        }
    }
}

/// One line of the suite log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub timestamp: String,
    /// Assigned by [`JsonlLog::append`].
    pub trace_id: String,
    pub level: Level,
    pub scenario: String,
    pub mode: String,
    pub expected: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<ChildTermination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ScenarioRecord {
    #[must_use]
    pub fn new(scenario: &Scenario, mode: CheckMode, outcome: Outcome) -> Self {
        Self {
            timestamp: utc_timestamp(SystemTime::now()),
            trace_id: String::new(),
            level: outcome.level(),
            scenario: scenario.name.to_string(),
            mode: mode.as_str().to_string(),
            expected: scenario.expectation.as_str().to_string(),
            outcome,
            termination: None,
            duration_ms: None,
            details: serde_json::Value::Null,
        }
    }

    /// Attach how the child ended and how long it took.
    #[must_use]
    pub fn with_run(mut self, run: &IsolatedRun) -> Self {
        self.termination = Some(run.termination.clone());
        self.duration_ms = Some(run.duration_ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Appends [`ScenarioRecord`]s as JSON lines.
pub struct JsonlLog {
    out: Box<dyn Write>,
    run_id: String,
    written: u64,
}

impl JsonlLog {
    /// Log to `path`, creating missing parent directories.
    pub fn create(path: &Path, run_id: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(BufWriter::new(file)), run_id))
    }

    #[must_use]
    pub fn stdout(run_id: &str) -> Self {
        Self::from_writer(Box::new(io::stdout()), run_id)
    }

    #[must_use]
    pub fn from_writer(out: Box<dyn Write>, run_id: &str) -> Self {
        Self {
            out,
            run_id: run_id.to_owned(),
            written: 0,
        }
    }

    /// Number the record and write it as one line.
    pub fn append(&mut self, mut record: ScenarioRecord) -> io::Result<ScenarioRecord> {
        self.written += 1;
        record.trace_id = format!("{TRACE_PREFIX}{}::{:03}", self.run_id, self.written);
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(record)
    }

    pub fn finish(mut self) -> io::Result<u64> {
        self.out.flush()?;
        Ok(self.written)
    }
}

/// Why a log line was rejected.
#[derive(Debug, Error)]
pub enum LogLineError {
    #[error("not JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("schema: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("trace id `{0}` does not start with `softmte::`")]
    TraceId(String),
}

/// Parse and check one line of a suite log.
pub fn parse_line(line: &str) -> Result<ScenarioRecord, LogLineError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(LogLineError::Json)?;
    let obj = value.as_object().ok_or(LogLineError::NotAnObject)?;
    if let Some(field) = REQUIRED.iter().find(|f| !obj.contains_key(**f)) {
        return Err(LogLineError::MissingField(*field));
    }
    let record: ScenarioRecord = serde_json::from_value(value).map_err(LogLineError::Schema)?;
    if !record.trace_id.starts_with(TRACE_PREFIX) {
        return Err(LogLineError::TraceId(record.trace_id));
    }
    Ok(record)
}

/// RFC 3339 UTC with millisecond precision.
fn utc_timestamp(at: SystemTime) -> String {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let of_day = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        of_day / 3600,
        of_day % 3600 / 60,
        of_day % 60,
        since_epoch.subsec_millis()
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

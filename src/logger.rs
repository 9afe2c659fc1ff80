//! Append-only JSONL run log.
//!
//! One self-contained JSON object per `apply` run. Lines are assembled in
//! memory and written with a single `write_all` so a concurrent tail never
//! sees a partial record. Logging is best-effort: callers warn on failure
//! and continue, a setup run must never abort because its log could not
//! be written.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::audit::AuditReport;
use crate::core::errors::{Result, TepError};
use crate::forwarding::ForwardingState;
use crate::persist::PersistOutcome;

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    DryRun,
    Failed,
}

/// One run-log record.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub command: &'static str,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardingState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist: Option<PersistOutcome>,
    pub audit_warnings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Record skeleton stamped with the current time.
    #[must_use]
    pub fn new(command: &'static str, outcome: RunOutcome) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            command,
            outcome,
            forwarding: None,
            persist: None,
            audit_warnings: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn with_forwarding(mut self, state: ForwardingState) -> Self {
        self.forwarding = Some(state);
        self
    }

    #[must_use]
    pub fn with_persist(mut self, outcome: PersistOutcome) -> Self {
        self.persist = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, report: &AuditReport) -> Self {
        self.audit_warnings = report.warn_count();
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Append one record to the run log, creating parent directories on first
/// use.
pub fn append_run(path: &Path, record: &RunRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| TepError::io(parent, source))?;
    }

    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TepError::io(path, source))?;
    handle
        .write_all(line.as_bytes())
        .map_err(|source| TepError::io(path, source))?;
    Ok(())
}

//! Setup pipeline: privilege guard → enable forwarding → persist →
//! verify → audit.
//!
//! Control flow is strictly linear with early exit on fatal steps, so the
//! whole run is expressible as one function over the [`Platform`] trait.

#![allow(missing_docs)]

use serde::Serialize;

use crate::audit::{self, AuditReport, Finding};
use crate::core::config::Config;
use crate::core::errors::{Result, TepError};
use crate::forwarding::{self, ForwardingState};
use crate::persist::{self, PersistOutcome};
use crate::platform::pal::Platform;

/// Result of a full (or dry) apply run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub dry_run: bool,
    /// Flag values before any mutation.
    pub before: ForwardingState,
    /// Post-write verified state. `None` on dry runs.
    pub verified: Option<ForwardingState>,
    /// Persistence action taken. `None` on dry runs.
    pub persist: Option<PersistOutcome>,
    /// Whether the persist file needs (or needed) an append.
    pub persist_needed: bool,
    pub audit: AuditReport,
}

/// Read-only system view for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub forwarding: ForwardingState,
    /// Whether both directives are already persisted.
    pub persisted: bool,
    pub privilege: Finding,
    pub audit: AuditReport,
}

/// Abort unless running as root. First step of every mutating run; no
/// system state is touched before this passes.
pub fn guard_privileges(platform: &dyn Platform) -> Result<()> {
    let euid = platform.effective_uid();
    if euid == 0 {
        Ok(())
    } else {
        Err(TepError::PrivilegeRequired { euid })
    }
}

/// Run the full setup sequence.
///
/// Dry runs skip the privilege guard and perform no writes; they report
/// what a real run would do.
pub fn apply(platform: &dyn Platform, config: &Config, dry_run: bool) -> Result<ApplyOutcome> {
    if !dry_run {
        guard_privileges(platform)?;
    }

    let before = forwarding::read_state(platform)?;
    let persist_needed = !persisted_directives_present(config);

    if dry_run {
        return Ok(ApplyOutcome {
            dry_run,
            before,
            verified: None,
            persist: None,
            persist_needed,
            audit: audit::run_audit(platform, config),
        });
    }

    forwarding::enable(platform)?;
    let persist = persist::ensure_directives(&config.sysctl.persist_file)?;
    let verified = forwarding::verify(platform)?;
    let audit = audit::run_audit(platform, config);

    Ok(ApplyOutcome {
        dry_run,
        before,
        verified: Some(verified),
        persist: Some(persist),
        persist_needed,
        audit,
    })
}

/// Gather the read-only status view. Requires no privileges and performs
/// no writes.
pub fn status(platform: &dyn Platform, config: &Config) -> Result<StatusView> {
    Ok(StatusView {
        forwarding: forwarding::read_state(platform)?,
        persisted: persisted_directives_present(config),
        privilege: audit::privilege_finding(platform),
        audit: audit::run_audit(platform, config),
    })
}

fn persisted_directives_present(config: &Config) -> bool {
    std::fs::read_to_string(&config.sysctl.persist_file)
        .is_ok_and(|contents| persist::directives_present(&contents))
}

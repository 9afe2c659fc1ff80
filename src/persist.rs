//! Idempotent persistence of the forwarding directives in the sysctl
//! config file.
//!
//! Policy: exact-line literal matching. If both directive lines are
//! already present the file is left untouched; otherwise a timestamped
//! backup is taken first and the directive block is appended after the
//! existing content. A key present with a conflicting value (e.g.
//! `net.ipv4.ip_forward=0`) is deliberately not treated as a match and
//! not reported as a conflict.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::errors::{Result, TepError};
use crate::forwarding::{ENABLED, FORWARD_KEYS};

/// Comment marker written above the appended directive block.
pub const DIRECTIVE_COMMENT: &str = "# Tailscale exit node: enable IP forwarding";

/// The exact directive lines persisted to the sysctl config file.
#[must_use]
pub fn forwarding_directives() -> [String; 2] {
    FORWARD_KEYS.map(|key| format!("{key}={ENABLED}"))
}

/// Outcome of the idempotent insertion.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PersistOutcome {
    /// Both directive lines already present; nothing written, no backup.
    AlreadyPresent,
    /// Directive block appended. `backup` is `None` only when the persist
    /// file did not exist yet.
    Appended { backup: Option<PathBuf> },
}

/// Whether both directive lines are present in the given file contents.
#[must_use]
pub fn directives_present(contents: &str) -> bool {
    forwarding_directives()
        .iter()
        .all(|directive| contents.lines().any(|line| line.trim() == directive))
}

/// Ensure both forwarding directives are persisted in `file`.
pub fn ensure_directives(file: &Path) -> Result<PersistOutcome> {
    ensure_directives_at(file, Local::now())
}

/// Timestamp-injectable variant of [`ensure_directives`].
pub fn ensure_directives_at(file: &Path, now: DateTime<Local>) -> Result<PersistOutcome> {
    let existing = if file.exists() {
        Some(fs::read_to_string(file).map_err(|source| TepError::io(file, source))?)
    } else {
        None
    };

    if let Some(contents) = &existing
        && directives_present(contents)
    {
        return Ok(PersistOutcome::AlreadyPresent);
    }

    let backup = match &existing {
        Some(_) => Some(write_backup(file, now)?),
        None => None,
    };

    let needs_leading_newline = existing
        .as_deref()
        .is_some_and(|contents| !contents.is_empty() && !contents.ends_with('\n'));

    let mut block = String::new();
    if needs_leading_newline {
        block.push('\n');
    }
    block.push('\n');
    block.push_str(DIRECTIVE_COMMENT);
    block.push('\n');
    for directive in forwarding_directives() {
        block.push_str(&directive);
        block.push('\n');
    }

    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .map_err(|source| TepError::io(file, source))?;
    handle
        .write_all(block.as_bytes())
        .map_err(|source| TepError::io(file, source))?;

    Ok(PersistOutcome::Appended { backup })
}

/// Copy `file` to a timestamped sibling, disambiguating on collision so
/// repeated runs within one second still produce distinct backups.
fn write_backup(file: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let stamp = now.format("%Y%m%d-%H%M%S");
    let base = backup_path(file, &stamp.to_string());
    let mut candidate = base.clone();
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}.{counter}", base.display()));
        counter += 1;
    }
    fs::copy(file, &candidate).map_err(|source| TepError::io(&candidate, source))?;
    Ok(candidate)
}

fn backup_path(file: &Path, stamp: &str) -> PathBuf {
    let mut name = file.file_name().map_or_else(
        || std::ffi::OsString::from("sysctl.conf"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(format!(".bak.{stamp}"));
    file.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    fn backups_in(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").path())
            .filter(|path| path.to_string_lossy().contains(".bak."))
            .collect()
    }

    #[test]
    fn directive_lines_match_kernel_keys() {
        assert_eq!(
            forwarding_directives(),
            [
                "net.ipv4.ip_forward=1".to_string(),
                "net.ipv6.conf.all.forwarding=1".to_string(),
            ]
        );
    }

    #[test]
    fn both_lines_present_skips_without_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");
        fs::write(
            &file,
            "vm.swappiness=10\nnet.ipv4.ip_forward=1\nnet.ipv6.conf.all.forwarding=1\n",
        )
        .expect("seed file");

        let outcome = ensure_directives_at(&file, fixed_now()).expect("ensure");
        assert_eq!(outcome, PersistOutcome::AlreadyPresent);
        assert!(backups_in(dir.path()).is_empty(), "no backup expected");
    }

    #[test]
    fn conflicting_value_is_not_a_match() {
        // A disabled directive must not satisfy the presence check.
        assert!(!directives_present(
            "net.ipv4.ip_forward=0\nnet.ipv6.conf.all.forwarding=1\n"
        ));
    }

    #[test]
    fn missing_line_appends_after_existing_content_with_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");
        fs::write(&file, "vm.swappiness=10\nnet.ipv4.ip_forward=1\n").expect("seed file");

        let outcome = ensure_directives_at(&file, fixed_now()).expect("ensure");
        let PersistOutcome::Appended { backup } = &outcome else {
            panic!("expected append, got {outcome:?}");
        };
        let backup = backup.as_ref().expect("backup expected for existing file");
        assert!(backup.exists());
        assert_eq!(
            fs::read_to_string(backup).expect("backup contents"),
            "vm.swappiness=10\nnet.ipv4.ip_forward=1\n",
            "backup must hold pre-append contents"
        );

        let contents = fs::read_to_string(&file).expect("contents");
        assert!(contents.starts_with("vm.swappiness=10\n"), "append, not replace");
        assert!(contents.contains(DIRECTIVE_COMMENT));
        assert!(directives_present(&contents));
        assert_eq!(backups_in(dir.path()).len(), 1, "exactly one backup");
    }

    #[test]
    fn missing_file_is_created_without_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");

        let outcome = ensure_directives_at(&file, fixed_now()).expect("ensure");
        assert_eq!(outcome, PersistOutcome::Appended { backup: None });
        assert!(directives_present(
            &fs::read_to_string(&file).expect("contents")
        ));
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn unterminated_file_gets_newline_before_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");
        fs::write(&file, "vm.swappiness=10").expect("seed file");

        ensure_directives_at(&file, fixed_now()).expect("ensure");
        let contents = fs::read_to_string(&file).expect("contents");
        assert!(
            contents.contains("vm.swappiness=10\n"),
            "existing final line must stay intact: {contents:?}"
        );
        assert!(directives_present(&contents));
    }

    #[test]
    fn backup_names_stay_distinct_within_one_second() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");
        fs::write(&file, "net.ipv4.ip_forward=1\n").expect("seed file");

        ensure_directives_at(&file, fixed_now()).expect("first ensure");
        // Remove the appended block so the second run appends again.
        fs::write(&file, "net.ipv4.ip_forward=1\n").expect("reset file");
        ensure_directives_at(&file, fixed_now()).expect("second ensure");

        let backups = backups_in(dir.path());
        assert_eq!(backups.len(), 2, "collision must disambiguate: {backups:?}");
    }

    #[test]
    fn second_run_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("sysctl.conf");

        ensure_directives_at(&file, fixed_now()).expect("first ensure");
        let after_first = fs::read_to_string(&file).expect("contents");
        let outcome = ensure_directives_at(&file, fixed_now()).expect("second ensure");
        assert_eq!(outcome, PersistOutcome::AlreadyPresent);
        assert_eq!(
            fs::read_to_string(&file).expect("contents"),
            after_first,
            "repeat run must not grow the file"
        );
    }
}

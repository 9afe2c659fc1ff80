//! Environment audit: container runtime, compose tooling, and env-file
//! contract checks.
//!
//! Every check is an independent function returning a [`Finding`];
//! findings are collected into an [`AuditReport`] and rendered by the
//! CLI layer. Audit findings are advisory only — they never change the
//! process exit code.

#![allow(missing_docs)]

use std::fs;

use serde::Serialize;

use crate::core::config::{Config, EnvAuditConfig, RequiredKey};
use crate::platform::pal::{Platform, ServiceState};

/// Tri-state outcome of a single check.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    /// Reserved for checks that must abort the run (privilege guard).
    /// The environment audit itself never produces this.
    Fatal,
}

/// One named check result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Finding {
    pub name: &'static str,
    pub status: CheckStatus,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl Finding {
    fn ok(name: &'static str, summary: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            summary: summary.into(),
            remedy: None,
        }
    }

    fn warn(name: &'static str, summary: impl Into<String>, remedy: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            summary: summary.into(),
            remedy: Some(remedy.into()),
        }
    }
}

/// Collected audit findings.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
}

impl AuditReport {
    #[must_use]
    pub fn warn_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.status == CheckStatus::Warn)
            .count()
    }

    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.findings
            .iter()
            .any(|finding| finding.status == CheckStatus::Fatal)
    }

    #[must_use]
    pub fn worst(&self) -> CheckStatus {
        self.findings
            .iter()
            .map(|finding| finding.status)
            .max()
            .unwrap_or(CheckStatus::Ok)
    }
}

/// Privilege check expressed as a finding, for read-only status output.
/// The apply pipeline enforces this as a hard error instead.
#[must_use]
pub fn privilege_finding(platform: &dyn Platform) -> Finding {
    let euid = platform.effective_uid();
    if euid == 0 {
        Finding::ok("privilege", "running as root")
    } else {
        Finding {
            name: "privilege",
            status: CheckStatus::Fatal,
            summary: format!("effective uid is {euid}, not 0"),
            remedy: Some("re-run with sudo".to_string()),
        }
    }
}

/// Run the full advisory environment audit.
#[must_use]
pub fn run_audit(platform: &dyn Platform, config: &Config) -> AuditReport {
    AuditReport {
        findings: vec![
            check_runtime_command(platform, config),
            check_runtime_service(platform, config),
            check_compose(platform, config),
            check_env_file(&config.env_audit),
        ],
    }
}

fn check_runtime_command(platform: &dyn Platform, config: &Config) -> Finding {
    let command = &config.runtime.command;
    if platform.command_available(command) {
        Finding::ok("runtime_command", format!("{command} is installed"))
    } else {
        Finding::warn(
            "runtime_command",
            format!("{command} not found on PATH"),
            format!("install {command} before bringing up the exit-node container"),
        )
    }
}

fn check_runtime_service(platform: &dyn Platform, config: &Config) -> Finding {
    let service = &config.runtime.service;
    match platform.service_state(service) {
        ServiceState::Active => {
            Finding::ok("runtime_service", format!("{service} service is active"))
        }
        ServiceState::Inactive => Finding::warn(
            "runtime_service",
            format!("{service} service is not active"),
            format!("start it with: sudo systemctl start {service}"),
        ),
        ServiceState::Unknown => Finding::warn(
            "runtime_service",
            format!("could not determine {service} service state"),
            "check the service manually (systemctl unavailable?)".to_string(),
        ),
    }
}

fn check_compose(platform: &dyn Platform, config: &Config) -> Finding {
    let runtime = &config.runtime.command;
    let standalone = &config.runtime.compose_standalone;
    if platform.probe_succeeds(runtime, &["compose", "version"]) {
        Finding::ok("compose", format!("{runtime} compose plugin is available"))
    } else if platform.probe_succeeds(standalone, &["--version"]) {
        Finding::ok("compose", format!("{standalone} (standalone) is available"))
    } else {
        Finding::warn(
            "compose",
            "no compose tool found",
            format!("install the {runtime} compose plugin or {standalone}"),
        )
    }
}

fn check_env_file(env_audit: &EnvAuditConfig) -> Finding {
    let path = &env_audit.env_file;
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Finding::warn(
                "env_file",
                format!("{} not found", path.display()),
                example_block(&env_audit.required_keys),
            );
        }
        // Permission or encoding trouble: the file is there, telling the
        // operator to create it would be the wrong remedy.
        Err(err) => {
            return Finding::warn(
                "env_file",
                format!("{} exists but could not be read: {err}", path.display()),
                "fix the file's permissions or encoding, then re-run the audit".to_string(),
            );
        }
    };

    let missing = missing_keys(&contents, &env_audit.required_keys);
    if missing.is_empty() {
        Finding::ok(
            "env_file",
            format!("{} contains all required keys", path.display()),
        )
    } else {
        let names: Vec<&str> = missing.iter().map(|key| key.name.as_str()).collect();
        Finding::warn(
            "env_file",
            format!("{} is missing: {}", path.display(), names.join(", ")),
            example_block(&missing),
        )
    }
}

/// Required keys not present in the env-file contents. Presence means a
/// line with the literal `NAME=` prefix; values are never inspected.
fn missing_keys<'a>(contents: &str, required: &'a [RequiredKey]) -> Vec<&'a RequiredKey> {
    required
        .iter()
        .filter(|key| {
            let prefix = format!("{}=", key.name);
            !contents.lines().any(|line| line.starts_with(&prefix))
        })
        .collect()
}

fn example_block<K: std::borrow::Borrow<RequiredKey>>(keys: &[K]) -> String {
    let lines: Vec<String> = keys
        .iter()
        .map(|key| {
            let key = key.borrow();
            format!("{}={}", key.name, key.example)
        })
        .collect();
    format!("add to the env file:\n  {}", lines.join("\n  "))
}

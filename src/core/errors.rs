//! TEP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TepError>;

/// Top-level error type for the exit-node preparation helper.
#[derive(Debug, Error)]
pub enum TepError {
    #[error("[TEP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TEP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TEP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TEP-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[TEP-2001] root privileges required (effective uid {euid}); re-run with sudo")]
    PrivilegeRequired { euid: u32 },

    #[error("[TEP-2101] failed to read sysctl {key}: {details}")]
    SysctlRead { key: String, details: String },

    #[error("[TEP-2102] failed to set sysctl {key}: {details}")]
    SysctlWrite { key: String, details: String },

    #[error("[TEP-2103] verification failed for {key}: expected \"1\", read \"{actual}\"")]
    VerificationFailed { key: String, actual: String },

    #[error("[TEP-2104] failed to read host statistics ({subject}): {details}")]
    StatsRead { subject: String, details: String },

    #[error("[TEP-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TEP-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TEP-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl TepError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TEP-1001",
            Self::MissingConfig { .. } => "TEP-1002",
            Self::ConfigParse { .. } => "TEP-1003",
            Self::UnsupportedPlatform { .. } => "TEP-1101",
            Self::PrivilegeRequired { .. } => "TEP-2001",
            Self::SysctlRead { .. } => "TEP-2101",
            Self::SysctlWrite { .. } => "TEP-2102",
            Self::VerificationFailed { .. } => "TEP-2103",
            Self::StatsRead { .. } => "TEP-2104",
            Self::Serialization { .. } => "TEP-2201",
            Self::Io { .. } => "TEP-3001",
            Self::Runtime { .. } => "TEP-3900",
        }
    }

    /// Whether this failure maps to the strict exit-1 contract
    /// (wrong privilege level or post-write verification mismatch).
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::PrivilegeRequired { .. } | Self::VerificationFailed { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for TepError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TepError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

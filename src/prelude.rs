//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use tailnet_exit_prep::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, TepError};

// Platform
pub use crate::platform::pal::{LinuxPlatform, MockPlatform, Platform, detect_platform};

// Forwarding
pub use crate::forwarding::{ForwardingState, IPV4_FORWARD_KEY, IPV6_FORWARD_KEY};

// Persistence
pub use crate::persist::{PersistOutcome, ensure_directives};

// Audit
pub use crate::audit::{AuditReport, CheckStatus, Finding, run_audit};

// Monitor
pub use crate::monitor::{HostSampler, HostStats, UsageTier};

// Pipeline
pub use crate::setup::{ApplyOutcome, StatusView, apply, guard_privileges, status};

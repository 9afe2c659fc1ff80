//! Kernel IP-forwarding tunables: read, enable, and post-write verification.
//!
//! An exit node must route packets between its tailnet interface and the
//! uplink, which requires both the IPv4 and IPv6 forwarding flags. Writes
//! take immediate runtime effect only; durability across reboots is the
//! [`crate::persist`] module's job.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::errors::{Result, TepError};
use crate::platform::pal::Platform;

/// IPv4 forwarding tunable key.
pub const IPV4_FORWARD_KEY: &str = "net.ipv4.ip_forward";

/// IPv6 all-interface forwarding tunable key.
pub const IPV6_FORWARD_KEY: &str = "net.ipv6.conf.all.forwarding";

/// Value representing "forwarding enabled" in both tunables.
pub const ENABLED: &str = "1";

/// Both forwarding keys, in write order.
pub const FORWARD_KEYS: [&str; 2] = [IPV4_FORWARD_KEY, IPV6_FORWARD_KEY];

/// Snapshot of both forwarding flags as raw value text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ForwardingState {
    pub ipv4: String,
    pub ipv6: String,
}

impl ForwardingState {
    /// Whether both flags read as enabled.
    #[must_use]
    pub fn fully_enabled(&self) -> bool {
        self.ipv4 == ENABLED && self.ipv6 == ENABLED
    }
}

/// Read the current state of both forwarding flags.
pub fn read_state(platform: &dyn Platform) -> Result<ForwardingState> {
    Ok(ForwardingState {
        ipv4: platform.read_sysctl(IPV4_FORWARD_KEY)?,
        ipv6: platform.read_sysctl(IPV6_FORWARD_KEY)?,
    })
}

/// Set both forwarding flags to enabled. A failed write aborts the whole
/// run; there is no partial-success handling at this step.
pub fn enable(platform: &dyn Platform) -> Result<()> {
    for key in FORWARD_KEYS {
        platform.write_sysctl(key, ENABLED)?;
    }
    Ok(())
}

/// Re-read both flags and require that each reads back as enabled.
///
/// This is the only post-write step that hard-aborts: a kernel that
/// accepted the write but still reports the flag disabled leaves the host
/// unable to route, so continuing would hand the operator a broken exit
/// node with a green checkmark.
pub fn verify(platform: &dyn Platform) -> Result<ForwardingState> {
    let state = read_state(platform)?;
    if state.ipv4 != ENABLED {
        return Err(TepError::VerificationFailed {
            key: IPV4_FORWARD_KEY.to_string(),
            actual: state.ipv4,
        });
    }
    if state.ipv6 != ENABLED {
        return Err(TepError::VerificationFailed {
            key: IPV6_FORWARD_KEY.to_string(),
            actual: state.ipv6,
        });
    }
    Ok(state)
}

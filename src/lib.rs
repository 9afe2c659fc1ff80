#![forbid(unsafe_code)]

//! Tailnet Exit Prep (tep) — prepares a Linux host to act as a Tailscale
//! exit node.
//!
//! Three-phase setup:
//! 1. **Forwarding** — enable the IPv4/IPv6 kernel forwarding tunables and
//!    verify the kernel reports them enabled
//! 2. **Persistence** — idempotently append the forwarding directives to
//!    the sysctl config file, with a timestamped backup first
//! 3. **Audit** — advisory checks for the container runtime, compose
//!    tooling, and the env-file contract
//!
//! A separate [`monitor`] module samples host statistics (CPU, memory,
//! disk, network, load) and classifies the usage level with hysteresis.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use tailnet_exit_prep::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use tailnet_exit_prep::core::config::Config;
//! use tailnet_exit_prep::platform::pal::{LinuxPlatform, Platform};
//! ```

pub mod prelude;

pub mod audit;
pub mod core;
pub mod forwarding;
pub mod logger;
pub mod monitor;
pub mod persist;
pub mod platform;
pub mod setup;

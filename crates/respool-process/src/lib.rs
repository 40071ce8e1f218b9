//! # Respool Process
//!
//! Low-level Unix process operations for the respool supervisor.
//!
//! This crate provides:
//! - Process liveness checks
//! - Typed signal delivery
//! - Per-process memory accounting (Private_Dirty from the kernel's
//!   per-process memory map)
//! - Process-table interrogation (children, job-family walks)
//! - Process-title and hostname helpers
//!
//! Everything here is a thin, synchronous wrapper over the kernel; policy
//! (thresholds, escalation, gating) lives in `respool-manager`.

pub mod check;
pub mod memory;
pub mod procline;
pub mod signal;
pub mod table;

pub use check::process_alive;
pub use memory::private_dirty_mb;
pub use procline::{hostname, set_title};
pub use table::ProcessTable;

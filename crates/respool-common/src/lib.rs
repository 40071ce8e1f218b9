//! # Respool Common
//!
//! Shared error taxonomy for the respool worker-pool supervisor.
//!
//! This crate provides:
//! - The [`PoolError`] enum covering every failure class the supervisor
//!   distinguishes
//! - The [`PoolResult`] alias used throughout the workspace

pub mod errors;

pub use errors::{PoolError, PoolResult};

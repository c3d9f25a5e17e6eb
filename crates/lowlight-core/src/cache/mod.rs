//! Local registry of enhanced results and their retention.
//!
//! This module provides:
//! - `ResourceRegistry`: the persisted, per-user list of results
//! - `ExpirySweeper`: the background task that purges expired results
//! - `retention`: the single definition of the 24-hour rule
//!
//! A result is kept for 24 hours after upload, then dropped locally and,
//! when remote cleanup is enabled, deleted on the server too.

pub mod registry;
pub mod retention;
pub mod sweeper;

pub use registry::ResourceRegistry;
pub use sweeper::{ExpirySweeper, SweepReport, DEFAULT_SWEEP_INTERVAL};

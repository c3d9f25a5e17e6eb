//! Core library for the lowlight image enhancement client.
//!
//! The pieces, leaves first:
//!
//! - [`storage`] / [`auth::CredentialStore`]: persisted token, cached user and
//!   per-user result lists
//! - [`auth::SessionManager`]: restores, establishes and invalidates the session
//! - [`cache::ResourceRegistry`]: the results the user can still see, kept for
//!   24 hours after upload
//! - [`cache::ExpirySweeper`]: purges expired results in the background
//! - [`Lowlight`]: the context object that wires them together
//!
//! [`api::ApiClient`] talks to the service over HTTP.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod storage;

#[cfg(test)]
mod testing;

pub use auth::{SessionManager, SessionStatus};
pub use cache::{ResourceRegistry, SweepReport};
pub use config::Config;
pub use context::{ContextOptions, Lowlight};
pub use error::{ClientError, Result};
pub use models::{EnhancementRecord, ImageUpload, User};

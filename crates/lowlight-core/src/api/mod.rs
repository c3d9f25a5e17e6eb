//! REST API client module for the enhancement service.
//!
//! This module provides the `ApiClient` for talking to the service's auth,
//! enhancement, download and cleanup endpoints, and the `AuthService` /
//! `EnhancementService` traits the rest of the core is written against.
//!
//! Authenticated endpoints take an opaque bearer token issued by
//! `POST /auth/login`.

pub mod client;
pub mod error;
pub mod service;

pub use client::ApiClient;
pub use error::ApiError;
pub use service::{AuthService, EnhancementService, LoginGrant};

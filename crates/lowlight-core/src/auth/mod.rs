//! Authentication module for managing the user's session and credentials.
//!
//! This module provides:
//! - `SessionManager`: restore / login / register / logout and the global
//!   invalidation rule for rejected tokens
//! - `CredentialStore`: typed access to the persisted token, cached user and
//!   per-user result lists

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, StorageKey};
pub use session::{ActiveSession, SessionManager, SessionState, SessionStatus};

//! Collaborator interfaces the core depends on.
//!
//! `ApiClient` implements both over HTTP; tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::models::{EnhanceResponse, EnhancementModel, ImageUpload, User};

use super::ApiError;

/// A successful login: the user plus the bearer token to use from now on.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub user: User,
    pub token: String,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, email: &str, password: &str, name: &str) -> Result<User, ApiError>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant, ApiError>;

    async fn logout(&self, token: &str) -> Result<(), ApiError>;

    /// Resolve the user behind a token. `ApiError::Unauthorized` when the
    /// service no longer accepts it.
    async fn who_am_i(&self, token: &str) -> Result<User, ApiError>;
}

#[async_trait]
pub trait EnhancementService: Send + Sync {
    /// Upload an image and return the handle of the enhanced result.
    /// `download_url` in the response is absolute.
    async fn enhance(&self, token: &str, upload: &ImageUpload) -> Result<EnhanceResponse, ApiError>;

    async fn download(&self, enhanced_ref: &str) -> Result<Vec<u8>, ApiError>;

    /// Ask the service to delete the source and enhanced files of a result.
    async fn cleanup(&self, file_id: &str) -> Result<(), ApiError>;

    async fn models(&self) -> Result<Vec<EnhancementModel>, ApiError>;
}

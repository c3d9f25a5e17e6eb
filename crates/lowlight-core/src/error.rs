//! Errors returned by the public operations of the core.

use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Bad credentials, a rejected token, or no session at all.
    #[error("{0}")]
    Auth(String),

    /// Input the service would refuse: non-image files, missing fields.
    #[error("{0}")]
    Validation(String),

    /// Network or service failure; the message is the service's own.
    #[error("{0}")]
    Service(String),

    /// Unknown record. Public operations turn this into a no-op.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) => ClientError::Auth(msg),
            ApiError::BadRequest(msg) => ClientError::Validation(msg),
            ApiError::NotFound(msg) => ClientError::NotFound(msg),
            other => ClientError::Service(other.to_string()),
        }
    }
}

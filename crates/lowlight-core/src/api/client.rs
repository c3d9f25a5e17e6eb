//! API client for communicating with the enhancement service's REST API.
//!
//! This module provides the `ApiClient` struct for authenticating, uploading
//! images for enhancement and managing the enhanced files on the server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{EnhanceResponse, EnhancementModel, ImageUpload, User};

use super::service::{AuthService, EnhancementService, LoginGrant};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
/// Enhancement runs the model synchronously on the server, so this is long.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    user: User,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<EnhancementModel>,
}

/// API client for the enhancement service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client for the service rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The service hands out download paths relative to its root.
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            self.url(url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    /// Send a request, backing off and retrying while the service rate limits.
    async fn send_json<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build()
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_json(response, url).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, token: Option<&str>) -> Result<T, ApiError> {
        self.send_json(url, || {
            let request = self.client.get(url);
            match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(url, || {
            let request = self.client.post(url).json(body);
            match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .await
    }
}

#[async_trait]
impl AuthService for ApiClient {
    async fn register(&self, email: &str, password: &str, name: &str) -> Result<User, ApiError> {
        let url = self.url("/auth/register");
        let body = RegisterRequest { email, password, name };
        let response: UserResponse = self.post(&url, None, &body).await?;
        debug!(user_id = %response.user.id, "Registered account");
        Ok(response.user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let url = self.url("/auth/login");
        let body = LoginRequest { email, password };
        let response: LoginResponse = self.post(&url, None, &body).await?;
        debug!(user_id = %response.user.id, "Login accepted");
        Ok(LoginGrant {
            user: response.user,
            token: response.token,
        })
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let url = self.url("/auth/logout");
        let _: serde_json::Value = self.post(&url, Some(token), &serde_json::json!({})).await?;
        Ok(())
    }

    async fn who_am_i(&self, token: &str) -> Result<User, ApiError> {
        let url = self.url("/auth/me");
        let response: UserResponse = self.get(&url, Some(token)).await?;
        Ok(response.user)
    }
}

#[async_trait]
impl EnhancementService for ApiClient {
    async fn enhance(&self, token: &str, upload: &ImageUpload) -> Result<EnhanceResponse, ApiError> {
        let url = self.url("/enhance");
        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(file = %upload.file_name, size = upload.bytes.len(), "Uploading image for enhancement");

        // Uploads are not retried; the service may already be processing it.
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let mut parsed: EnhanceResponse = Self::parse_json(response, &url).await?;
        parsed.download_url = self.absolute_url(&parsed.download_url);
        Ok(parsed)
    }

    async fn download(&self, enhanced_ref: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.absolute_url(enhanced_ref);
        let response = self.client.get(&url).send().await?;
        let response = Self::check_response(response).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn cleanup(&self, file_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/cleanup/{}", file_id));
        let response = self.client.delete(&url).send().await?;
        Self::check_response(response).await?;
        debug!(file_id = file_id, "Server-side files cleaned up");
        Ok(())
    }

    async fn models(&self) -> Result<Vec<EnhancementModel>, ApiError> {
        let url = self.url("/models");
        let response: ModelsResponse = self.get(&url, None).await?;
        Ok(response.models)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn user_json() -> serde_json::Value {
        serde_json::json!({
            "id": "7",
            "email": "ada@example.com",
            "name": "Ada",
            "created_at": "2025-01-01T00:00:00",
            "last_login": null
        })
    }

    #[test]
    fn test_absolute_url() {
        let client = ApiClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.absolute_url("/download/abc"),
            "http://localhost:8000/download/abc"
        );
        assert_eq!(
            client.absolute_url("download/abc"),
            "http://localhost:8000/download/abc"
        );
        assert_eq!(
            client.absolute_url("https://cdn.example.com/x.jpg"),
            "https://cdn.example.com/x.jpg"
        );
    }

    #[tokio::test]
    async fn test_login_returns_token_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "Login successful",
                "token": "tok-123",
                "user": user_json()
            })))
            .mount(&server)
            .await;

        let grant = test_client(&server)
            .login("ada@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(grant.token, "tok-123");
        assert_eq!(grant.user.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "Invalid email or password"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server)
            .login("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn test_register_returns_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "user": user_json()
            })))
            .mount(&server)
            .await;

        let user = test_client(&server)
            .register("ada@example.com", "secret1", "Ada")
            .await
            .unwrap();
        assert_eq!(user.id, "7");
    }

    #[tokio::test]
    async fn test_who_am_i_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "user": user_json()
            })))
            .mount(&server)
            .await;

        let user = test_client(&server).who_am_i("tok-123").await.unwrap();
        assert_eq!(user.name, "Ada");
    }

    #[tokio::test]
    async fn test_who_am_i_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                serde_json::json!({"detail": "Invalid authentication credentials"}),
            ))
            .mount(&server)
            .await;

        let err = test_client(&server).who_am_i("stale").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_enhance_resolves_download_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/enhance"))
            .and(header("authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "file_id": "f-1",
                "original_filename": "dark.jpg",
                "download_url": "/download/f-1",
                "model_used": "lol_real"
            })))
            .mount(&server)
            .await;

        let upload = ImageUpload::new("dark.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF]);
        let response = test_client(&server).enhance("tok-123", &upload).await.unwrap();
        assert_eq!(response.file_id.as_deref(), Some("f-1"));
        assert_eq!(response.download_url, format!("{}/download/f-1", server.uri()));
        assert_eq!(response.model_used.as_deref(), Some("lol_real"));
    }

    #[tokio::test]
    async fn test_enhance_unauthorized_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/enhance"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let upload = ImageUpload::new("dark.jpg", "image/jpeg", vec![1]);
        let err = test_client(&server).enhance("tok", &upload).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_enhance_server_error_keeps_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/enhance"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"detail": "Processing failed: out of memory"})),
            )
            .mount(&server)
            .await;

        let upload = ImageUpload::new("dark.jpg", "image/jpeg", vec![1]);
        let err = test_client(&server).enhance("tok", &upload).await.unwrap_err();
        assert!(!err.is_unauthorized());
        assert_eq!(err.to_string(), "Processing failed: out of memory");
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "Enhanced image not found"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server).download("/download/gone").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/f-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8, 8, 7]))
            .mount(&server)
            .await;

        let bytes = test_client(&server)
            .download(&format!("{}/download/f-1", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_cleanup_and_models() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cleanup/f-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"success": true, "message": "Files cleaned up"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"id": "lol_real", "name": "LOL Real Dataset", "description": "Trained on real low light images"}]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        client.cleanup("f-1").await.unwrap();
        let models = client.models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "lol_real");
    }
}

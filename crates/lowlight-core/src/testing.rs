//! In-memory stand-ins for the remote service, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, AuthService, EnhancementService, LoginGrant};
use crate::clock::Clock;
use crate::models::{EnhanceResponse, EnhancementModel, ImageUpload, User};

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        name: format!("User {}", id),
        email: format!("user{}@example.com", id),
        created_at: Some("2025-01-01T00:00:00".to_string()),
        last_login: None,
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Accounts keyed by email; password is always "secret1". Issued tokens are
/// `token-<user id>`.
#[derive(Default)]
pub struct FakeAuth {
    accounts: Mutex<HashMap<String, User>>,
    valid_tokens: Mutex<HashMap<String, User>>,
    pub fail_logout: bool,
    pub logout_calls: AtomicUsize,
    /// When set, `logout` parks until `release_logout` is called.
    logout_gate: Option<Notify>,
    pub logout_entered: Notify,
    pub who_am_i_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, user: User) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(user.email.clone(), user);
        self
    }

    pub fn accept_token(self, token: &str, user: User) -> Self {
        self.valid_tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), user);
        self
    }

    pub fn gated_logout(mut self) -> Self {
        self.logout_gate = Some(Notify::new());
        self
    }

    pub fn release_logout(&self) {
        if let Some(gate) = &self.logout_gate {
            gate.notify_one();
        }
    }

    pub fn revoke(&self, token: &str) {
        self.valid_tokens.lock().unwrap().remove(token);
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn register(&self, email: &str, _password: &str, name: &str) -> Result<User, ApiError> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(email) {
            return Err(ApiError::BadRequest("User already exists".into()));
        }
        let user = User {
            id: (accounts.len() + 1).to_string(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: None,
            last_login: None,
        };
        accounts.insert(email.to_string(), user.clone());
        Ok(user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let user = self.accounts.lock().unwrap().get(email).cloned();
        match user {
            Some(user) if password == "secret1" => {
                let token = format!("token-{}", user.id);
                self.valid_tokens
                    .lock()
                    .unwrap()
                    .insert(token.clone(), user.clone());
                Ok(LoginGrant { user, token })
            }
            _ => Err(ApiError::Unauthorized("Invalid email or password".into())),
        }
    }

    async fn logout(&self, _token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_entered.notify_one();
        if let Some(gate) = &self.logout_gate {
            gate.notified().await;
        }
        if self.fail_logout {
            Err(ApiError::ServerError("logout exploded".into()))
        } else {
            Ok(())
        }
    }

    async fn who_am_i(&self, token: &str) -> Result<User, ApiError> {
        self.who_am_i_calls.fetch_add(1, Ordering::SeqCst);
        self.valid_tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Invalid authentication credentials".into()))
    }
}

/// What the fake enhancement endpoint should do on the next upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceOutcome {
    Succeed,
    SucceedWithoutId,
    Unauthorized,
    Fail,
}

pub struct FakeEnhancer {
    pub outcome: Mutex<EnhanceOutcome>,
    pub enhance_calls: AtomicUsize,
    pub cleaned: Mutex<Vec<String>>,
    pub missing_downloads: Mutex<Vec<String>>,
    /// When set, `enhance` parks until `release` is notified.
    pub gate: Option<Notify>,
    pub entered: Notify,
    counter: AtomicUsize,
}

impl FakeEnhancer {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(EnhanceOutcome::Succeed),
            enhance_calls: AtomicUsize::new(0),
            cleaned: Mutex::new(Vec::new()),
            missing_downloads: Mutex::new(Vec::new()),
            gate: None,
            entered: Notify::new(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new()
        }
    }

    pub fn set_outcome(&self, outcome: EnhanceOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.enhance_calls.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnhancementService for FakeEnhancer {
    async fn enhance(&self, _token: &str, upload: &ImageUpload) -> Result<EnhanceResponse, ApiError> {
        self.enhance_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let outcome = *self.outcome.lock().unwrap();
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome {
            EnhanceOutcome::Succeed => Ok(EnhanceResponse {
                file_id: Some(format!("file-{}", n)),
                original_filename: Some(upload.file_name.clone()),
                download_url: format!("http://service.test/download/file-{}", n),
                model_used: Some("lol_real".to_string()),
            }),
            EnhanceOutcome::SucceedWithoutId => Ok(EnhanceResponse {
                file_id: None,
                original_filename: None,
                download_url: format!("http://service.test/download/anon-{}", n),
                model_used: None,
            }),
            EnhanceOutcome::Unauthorized => Err(ApiError::Unauthorized("Authentication required".into())),
            EnhanceOutcome::Fail => Err(ApiError::ServerError("Processing failed: model crashed".into())),
        }
    }

    async fn download(&self, enhanced_ref: &str) -> Result<Vec<u8>, ApiError> {
        let missing = self.missing_downloads.lock().unwrap();
        if missing.iter().any(|m| enhanced_ref.ends_with(m.as_str())) {
            return Err(ApiError::NotFound("Enhanced image not found".into()));
        }
        Ok(enhanced_ref.as_bytes().to_vec())
    }

    async fn cleanup(&self, file_id: &str) -> Result<(), ApiError> {
        self.cleaned.lock().unwrap().push(file_id.to_string());
        Ok(())
    }

    async fn models(&self) -> Result<Vec<EnhancementModel>, ApiError> {
        Ok(vec![EnhancementModel {
            id: "lol_real".into(),
            name: "LOL Real Dataset".into(),
            description: None,
        }])
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::{EnhancementRecord, User};
use crate::storage::{MemoryBackend, StorageBackend};

/// The logical keys the client persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKey {
    AuthToken,
    CachedUser,
    /// Result list owned by one user.
    Records(String),
}

impl StorageKey {
    pub fn name(&self) -> String {
        match self {
            StorageKey::AuthToken => "auth_token".to_string(),
            StorageKey::CachedUser => "user".to_string(),
            StorageKey::Records(user_id) => format!("records_{}", sanitize(user_id)),
        }
    }
}

/// Keep user ids usable as file names and keychain entry names. Anything
/// other than ASCII alphanumerics and `-` becomes `_xx` per UTF-8 byte, so
/// distinct ids never share a key.
fn sanitize(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Typed access to the client's persisted state.
///
/// The bearer token goes to the `secrets` backend (the OS keychain when
/// configured); the cached user and result lists go to `data`.
/// Clone is cheap and all clones share the same backends.
#[derive(Clone)]
pub struct CredentialStore {
    secrets: Arc<dyn StorageBackend>,
    data: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    pub fn new(secrets: Arc<dyn StorageBackend>, data: Arc<dyn StorageBackend>) -> Self {
        Self { secrets, data }
    }

    /// Keep everything in a single backend
    pub fn shared(backend: Arc<dyn StorageBackend>) -> Self {
        Self::new(backend.clone(), backend)
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryBackend::new()))
    }

    // ===== Token =====

    pub fn token(&self) -> Result<Option<String>> {
        let token = self.secrets.get(&StorageKey::AuthToken.name())?;
        Ok(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.secrets.set(&StorageKey::AuthToken.name(), token)
    }

    pub fn clear_token(&self) -> Result<()> {
        self.secrets.remove(&StorageKey::AuthToken.name())
    }

    // ===== Cached user =====

    pub fn cached_user(&self) -> Result<Option<User>> {
        self.load_json(&StorageKey::CachedUser)
    }

    pub fn set_cached_user(&self, user: &User) -> Result<()> {
        self.save_json(&StorageKey::CachedUser, user)
    }

    pub fn clear_cached_user(&self) -> Result<()> {
        self.data.remove(&StorageKey::CachedUser.name())
    }

    // ===== Records =====

    /// A stored list that no longer parses is discarded rather than
    /// failing every later read.
    pub fn records(&self, user_id: &str) -> Result<Option<Vec<EnhancementRecord>>> {
        let name = StorageKey::Records(user_id.to_string()).name();
        let Some(contents) = self.data.get(&name)? else {
            return Ok(None);
        };
        match serde_json::from_str(&contents) {
            Ok(records) => Ok(Some(records)),
            Err(e) => {
                warn!(key = %name, error = %e, "Discarding unreadable record list");
                self.data.remove(&name)?;
                Ok(None)
            }
        }
    }

    pub fn set_records(&self, user_id: &str, records: &[EnhancementRecord]) -> Result<()> {
        self.save_json(&StorageKey::Records(user_id.to_string()), &records)
    }

    pub fn clear_records(&self, user_id: &str) -> Result<()> {
        self.data.remove(&StorageKey::Records(user_id.to_string()).name())
    }

    /// Forget the token and cached user. Both removals are attempted even if
    /// the first fails.
    pub fn clear_session(&self) -> Result<()> {
        let token = self.clear_token();
        let user = self.clear_cached_user();
        token.and(user)
    }

    fn load_json<T: serde::de::DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>> {
        let name = key.name();
        match self.data.get(&name)? {
            Some(contents) => {
                let value = serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse stored value: {}", name))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn save_json<T: serde::Serialize + ?Sized>(&self, key: &StorageKey, value: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(value)?;
        self.data.set(&key.name(), &contents)
    }
}

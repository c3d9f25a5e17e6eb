use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{ApiError, EnhancementService};
use crate::auth::{CredentialStore, SessionManager};
use crate::clock::Clock;
use crate::error::{ClientError, Result};
use crate::models::{EnhancementRecord, ImageUpload};

use super::retention;

/// The in-memory set and whose it is.
#[derive(Debug, Default)]
struct Loaded {
    owner: Option<String>,
    records: Vec<EnhancementRecord>,
}

/// The client's view of the enhanced results it can still show.
///
/// Every mutation replaces the whole set and persists it while holding the
/// write lock, so concurrent callers (uploads, removals, sweeper ticks)
/// serialize their writes.
pub struct ResourceRegistry {
    session: SessionManager,
    store: CredentialStore,
    service: Arc<dyn EnhancementService>,
    clock: Arc<dyn Clock>,
    remote_cleanup: bool,
    loaded: RwLock<Loaded>,
}

impl ResourceRegistry {
    pub fn new(
        session: SessionManager,
        store: CredentialStore,
        service: Arc<dyn EnhancementService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            store,
            service,
            clock,
            remote_cleanup: true,
            loaded: RwLock::new(Loaded::default()),
        }
    }

    /// Whether removals also ask the service to delete its copy.
    pub fn with_remote_cleanup(mut self, enabled: bool) -> Self {
        self.remote_cleanup = enabled;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ===== Reading =====

    pub async fn records(&self) -> Vec<EnhancementRecord> {
        self.loaded.read().await.records.clone()
    }

    pub async fn get(&self, id: &str) -> Option<EnhancementRecord> {
        self.loaded
            .read()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.loaded.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining retention for a record uploaded at `uploaded_at`, e.g. `"22h 0m"`.
    pub fn time_remaining(&self, uploaded_at: DateTime<Utc>) -> String {
        retention::time_remaining_display(uploaded_at, self.now())
    }

    // ===== Lifecycle =====

    /// Publish the persisted, still-valid records of the current user.
    ///
    /// Expired records are dropped and the persisted list is rewritten if
    /// anything was dropped. With no authenticated session the set is empty.
    pub async fn load(&self) -> Result<Vec<EnhancementRecord>> {
        let Some(active) = self.session.current().await else {
            let mut loaded = self.loaded.write().await;
            *loaded = Loaded::default();
            return Ok(Vec::new());
        };

        let mut loaded = self.loaded.write().await;
        let valid = self.load_valid(&active.user_id)?;

        info!(user_id = %active.user_id, count = valid.len(), "Loaded enhancement records");
        loaded.owner = Some(active.user_id);
        loaded.records = valid.clone();
        Ok(valid)
    }

    /// Forget the in-memory set and, if `user_id` is given, that user's
    /// persisted list.
    pub async fn clear(&self, user_id: Option<&str>) -> Result<()> {
        let mut loaded = self.loaded.write().await;
        *loaded = Loaded::default();
        if let Some(user_id) = user_id {
            self.store.clear_records(user_id)?;
        }
        Ok(())
    }

    // ===== Mutations =====

    /// Send an image to the service and track the result.
    ///
    /// Fails with `ClientError::Auth` and makes no network call when no
    /// session is authenticated. Service errors are returned with the
    /// service's message and leave the registry untouched.
    pub async fn enhance(&self, upload: &ImageUpload) -> Result<EnhancementRecord> {
        let Some(active) = self.session.current().await else {
            return Err(ClientError::Auth("Please login first".to_string()));
        };

        if upload.bytes.is_empty() {
            return Err(ClientError::Validation("File is empty".to_string()));
        }
        if !upload.is_image() {
            return Err(ClientError::Validation("File must be an image".to_string()));
        }

        let response = self
            .service
            .enhance(&active.token, upload)
            .await
            .map_err(|e| {
                warn!(error = %e, file = %upload.file_name, "Enhancement failed");
                ClientError::from(e)
            })?;

        let record = EnhancementRecord {
            id: response
                .file_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            original_name: response
                .original_filename
                .unwrap_or_else(|| upload.file_name.clone()),
            size_bytes: upload.size_bytes(),
            mime_type: upload.mime_type.clone(),
            original_ref: upload
                .local_ref
                .clone()
                .unwrap_or_else(|| upload.file_name.clone()),
            enhanced_ref: response.download_url,
            model: response.model_used,
            uploaded_at: self.now(),
        };

        let mut loaded = self.loaded.write().await;

        // The session may have ended while the upload was in flight. Checked
        // under the write lock so a concurrent clear cannot slip in between.
        if !self.session.is_current(&active).await {
            info!(record_id = %record.id, "Session changed during enhancement, discarding result");
            return Err(ClientError::Auth(
                "Session ended before the enhancement completed".to_string(),
            ));
        }

        if loaded.owner.as_deref() != Some(active.user_id.as_str()) {
            // Not loaded yet for this user: start from what is persisted.
            loaded.records = self.load_valid(&active.user_id)?;
            loaded.owner = Some(active.user_id.clone());
        }

        let mut next = loaded.records.clone();
        next.push(record.clone());
        self.store.set_records(&active.user_id, &next)?;
        loaded.records = next;

        info!(record_id = %record.id, "Enhancement recorded");
        Ok(record)
    }

    /// Delete one record. Returns whether anything was removed; an unknown
    /// id is a no-op.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut loaded = self.loaded.write().await;
            let Some(pos) = loaded.records.iter().position(|r| r.id == id) else {
                debug!(record_id = id, "Remove of unknown record ignored");
                return Ok(false);
            };

            let mut next = loaded.records.clone();
            let removed = next.remove(pos);
            if let Some(owner) = loaded.owner.clone() {
                self.store.set_records(&owner, &next)?;
            }
            loaded.records = next;
            removed
        };

        info!(record_id = id, "Record removed");
        self.cleanup_remote(std::slice::from_ref(&removed)).await;
        Ok(true)
    }

    /// Drop every record past retention. Persisted storage is rewritten only
    /// when something was removed. Returns the removed records.
    pub async fn purge_expired(&self) -> Result<Vec<EnhancementRecord>> {
        let expired = {
            let mut loaded = self.loaded.write().await;
            let now = self.now();
            let (expired, valid): (Vec<_>, Vec<_>) = loaded
                .records
                .iter()
                .cloned()
                .partition(|r| retention::is_expired(r.uploaded_at, now));

            if expired.is_empty() {
                return Ok(expired);
            }

            if let Some(owner) = loaded.owner.clone() {
                self.store.set_records(&owner, &valid)?;
            }
            loaded.records = valid;
            expired
        };

        info!(count = expired.len(), "Purged expired records");
        self.cleanup_remote(&expired).await;
        Ok(expired)
    }

    /// Fetch the enhanced bytes of a record.
    ///
    /// `None` for an unknown id, or when the server no longer has the file;
    /// in the latter case the record is pruned locally.
    pub async fn download(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.get(id).await else {
            debug!(record_id = id, "Download of unknown record ignored");
            return Ok(None);
        };

        match self.service.download(&record.enhanced_ref).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ApiError::NotFound(_)) => {
                info!(record_id = id, "Server no longer has this result, pruning");
                self.prune_local(id).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The persisted records of `user_id` still within retention. Rewrites
    /// the persisted list when anything had expired.
    fn load_valid(&self, user_id: &str) -> Result<Vec<EnhancementRecord>> {
        let stored = self.store.records(user_id)?.unwrap_or_default();
        let now = self.now();
        let total = stored.len();
        let valid: Vec<EnhancementRecord> = stored
            .into_iter()
            .filter(|r| retention::is_valid(r.uploaded_at, now))
            .collect();

        if valid.len() != total {
            debug!(user_id, dropped = total - valid.len(), "Dropping expired stored records");
            self.store.set_records(user_id, &valid)?;
        }
        Ok(valid)
    }

    async fn prune_local(&self, id: &str) -> Result<()> {
        let mut loaded = self.loaded.write().await;
        let next: Vec<EnhancementRecord> = loaded
            .records
            .iter()
            .filter(|r| r.id != id)
            .cloned()
            .collect();
        if next.len() != loaded.records.len() {
            if let Some(owner) = loaded.owner.clone() {
                self.store.set_records(&owner, &next)?;
            }
            loaded.records = next;
        }
        Ok(())
    }

    /// Best-effort deletion of the server-side copies.
    async fn cleanup_remote(&self, records: &[EnhancementRecord]) {
        if !self.remote_cleanup {
            return;
        }
        for record in records {
            match self.service.cleanup(&record.id).await {
                Ok(()) => debug!(record_id = %record.id, "Remote copy deleted"),
                // Already gone on the server.
                Err(ApiError::NotFound(_)) => {}
                Err(e) => warn!(record_id = %record.id, error = %e, "Remote cleanup failed"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

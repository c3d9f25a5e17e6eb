//! The client context: one session, one registry, at most one sweeper.
//!
//! Built once at startup and handed to every consumer. It sequences the
//! components (restore before load, load before sweeping) and applies the
//! invalidation rule when the service rejects the token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, AuthService, EnhancementService};
use crate::auth::{CredentialStore, SessionManager, SessionStatus};
use crate::cache::{ExpirySweeper, ResourceRegistry, SweepReport, DEFAULT_SWEEP_INTERVAL};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, TokenStorage, APP_NAME};
use crate::error::Result;
use crate::models::{EnhancementModel, EnhancementRecord, ImageUpload, User};
use crate::storage::{FileBackend, KeyringBackend, StorageBackend};

/// Tunables that are not part of the collaborators themselves.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub sweep_interval: Duration,
    pub remote_cleanup: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            remote_cleanup: true,
        }
    }
}

impl From<&Config> for ContextOptions {
    fn from(config: &Config) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            remote_cleanup: config.remote_cleanup,
        }
    }
}

pub struct Lowlight {
    session: SessionManager,
    registry: Arc<ResourceRegistry>,
    enhancer: Arc<dyn EnhancementService>,
    sweeper: Mutex<Option<ExpirySweeper>>,
    sweep_interval: Duration,
    reports: Option<mpsc::Sender<SweepReport>>,
}

impl Lowlight {
    pub fn new(
        auth: Arc<dyn AuthService>,
        enhancer: Arc<dyn EnhancementService>,
        store: CredentialStore,
        clock: Arc<dyn Clock>,
        options: ContextOptions,
    ) -> Self {
        let session = SessionManager::new(auth, store.clone());
        let registry = ResourceRegistry::new(session.clone(), store, enhancer.clone(), clock)
            .with_remote_cleanup(options.remote_cleanup);

        Self {
            session,
            registry: Arc::new(registry),
            enhancer,
            sweeper: Mutex::new(None),
            sweep_interval: options.sweep_interval,
            reports: None,
        }
    }

    /// Wire the context against the real service and on-disk storage.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api = Arc::new(ApiClient::new(&config.api_base_url, config.request_timeout())?);

        let data: Arc<dyn StorageBackend> = Arc::new(FileBackend::new(config.data_dir()?)?);
        let secrets: Arc<dyn StorageBackend> = match config.token_storage {
            TokenStorage::File => data.clone(),
            TokenStorage::Keyring => Arc::new(KeyringBackend::new(APP_NAME)),
        };
        debug!(api = %config.api_base_url, token_storage = ?config.token_storage, "Client context configured");

        Ok(Self::new(
            api.clone(),
            api,
            CredentialStore::new(secrets, data),
            Arc::new(SystemClock),
            ContextOptions::from(config),
        ))
    }

    /// Receive a report after every sweep that removed something.
    pub fn with_sweep_reports(mut self, tx: mpsc::Sender<SweepReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    // ===== Session =====

    /// Restore the previous session; when it is still good, load its results
    /// and start sweeping.
    pub async fn start(&self) -> SessionStatus {
        let status = self.session.restore().await;
        if status == SessionStatus::Authenticated {
            self.on_authenticated().await;
        }
        status
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self.session.login(email, password).await?;
        self.on_authenticated().await;
        Ok(user)
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let user = self.session.register(email, password, name).await?;
        self.on_authenticated().await;
        Ok(user)
    }

    /// Tear down the session and everything scoped to it. Always succeeds.
    ///
    /// The session is demoted before the registry is cleared, so an upload
    /// still in flight is discarded instead of writing the list back.
    pub async fn logout(&self) {
        let user_id = self.session.current().await.map(|s| s.user_id);
        self.stop_sweeper().await;
        let token = self.session.end_local().await;
        if let Err(e) = self.registry.clear(user_id.as_deref()).await {
            warn!(error = %e, "Failed to clear stored records on logout");
        }
        if let Some(token) = token {
            self.session.logout_remote(&token).await;
        }
    }

    // ===== Results =====

    /// Enhance an image. A rejected token demotes the session before the
    /// error is returned.
    pub async fn enhance(&self, upload: &ImageUpload) -> Result<EnhancementRecord> {
        let before = self.session.current().await;
        match self.registry.enhance(upload).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_auth() => {
                // Only a rejection of the still-live session invalidates it.
                if let Some(active) = before {
                    if self.session.is_current(&active).await {
                        info!(user_id = %active.user_id, "Token rejected by the service, signing out");
                        self.invalidate().await;
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.registry.remove(id).await
    }

    pub async fn records(&self) -> Vec<EnhancementRecord> {
        self.registry.records().await
    }

    pub async fn download(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.registry.download(id).await
    }

    pub fn time_remaining(&self, uploaded_at: DateTime<Utc>) -> String {
        self.registry.time_remaining(uploaded_at)
    }

    pub async fn models(&self) -> Result<Vec<EnhancementModel>> {
        Ok(self.enhancer.models().await?)
    }

    // ===== Sweeper =====

    pub async fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    /// Stop background work without touching session or results.
    pub async fn shutdown(&self) {
        self.stop_sweeper().await;
    }

    // ===== Transitions =====

    async fn on_authenticated(&self) {
        if let Err(e) = self.registry.load().await {
            warn!(error = %e, "Failed to load stored records, starting empty");
            if let Err(e) = self.registry.clear(None).await {
                warn!(error = %e, "Failed to reset records");
            }
        }
        self.start_sweeper().await;
    }

    /// The global invalidation rule: stop sweeping, drop the in-memory
    /// results, and demote the session.
    async fn invalidate(&self) {
        self.stop_sweeper().await;
        if let Err(e) = self.registry.clear(None).await {
            warn!(error = %e, "Failed to reset records");
        }
        self.session.invalidate().await;
    }

    async fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(ExpirySweeper::start(
            self.registry.clone(),
            self.sweep_interval,
            self.reports.clone(),
        ));
    }

    async fn stop_sweeper(&self) {
        let running = self.sweeper.lock().await.take();
        if let Some(sweeper) = running {
            sweeper.stop().await;
        }
    }
}

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::api::{AuthService, LoginGrant};
use crate::error::{ClientError, Result};
use crate::models::User;

use super::CredentialStore;

/// Minimum password length the service accepts at registration.
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Restoring,
    Authenticated,
    /// A credential was just rejected. Never observed at rest; the manager
    /// clears down to `Anonymous` immediately after publishing it.
    Invalid,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Anonymous => write!(f, "anonymous"),
            SessionStatus::Restoring => write!(f, "restoring"),
            SessionStatus::Authenticated => write!(f, "authenticated"),
            SessionStatus::Invalid => write!(f, "invalid"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub status: SessionStatus,
    /// Bumped every time a session is established or torn down.
    pub generation: u64,
}

impl SessionState {
    fn restoring() -> Self {
        Self {
            user: None,
            token: None,
            status: SessionStatus::Restoring,
            generation: 0,
        }
    }
}

/// The identity of one authenticated session, as seen by callers that need
/// to check later whether it is still the live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub user_id: String,
    pub token: String,
    pub generation: u64,
}

struct Inner {
    auth: Arc<dyn AuthService>,
    store: CredentialStore,
    state: RwLock<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
}

/// Owns who the user is and whether their credential is still good.
/// Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthService>, store: CredentialStore) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Restoring);
        Self {
            inner: Arc::new(Inner {
                auth,
                store,
                state: RwLock::new(SessionState::restoring()),
                status_tx,
            }),
        }
    }

    // ===== Accessors =====

    pub async fn status(&self) -> SessionStatus {
        self.inner.state.read().await.status
    }

    pub async fn user(&self) -> Option<User> {
        self.inner.state.read().await.user.clone()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.status().await == SessionStatus::Authenticated
    }

    /// The live session, if authenticated.
    pub async fn current(&self) -> Option<ActiveSession> {
        let state = self.inner.state.read().await;
        match (&state.status, &state.user, &state.token) {
            (SessionStatus::Authenticated, Some(user), Some(token)) => Some(ActiveSession {
                user_id: user.id.clone(),
                token: token.clone(),
                generation: state.generation,
            }),
            _ => None,
        }
    }

    /// Whether `session` is still the live one (no logout or re-login since).
    pub async fn is_current(&self, session: &ActiveSession) -> bool {
        self.current().await.as_ref() == Some(session)
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    // ===== Lifecycle =====

    /// Restore the previous session at startup.
    ///
    /// Always resolves to `Authenticated` or `Anonymous`.
    pub async fn restore(&self) -> SessionStatus {
        self.publish(SessionStatus::Restoring).await;

        let token = match self.inner.store.token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, starting anonymous");
                None
            }
        };

        let Some(token) = token else {
            return self.restore_cached_user().await;
        };

        match self.inner.auth.who_am_i(&token).await {
            Ok(user) => {
                if let Err(e) = self.inner.store.set_cached_user(&user) {
                    warn!(error = %e, "Failed to cache restored user");
                }
                info!(user_id = %user.id, "Session restored");
                self.establish(user, token).await;
                SessionStatus::Authenticated
            }
            Err(e) => {
                info!(error = %e, "Stored token no longer accepted");
                self.invalidate().await;
                SessionStatus::Anonymous
            }
        }
    }

    /// No token: show a previously cached user, if any, without treating
    /// the session as authenticated.
    async fn restore_cached_user(&self) -> SessionStatus {
        let cached = match self.inner.store.cached_user() {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached user");
                None
            }
        };
        debug!(has_cached_user = cached.is_some(), "No stored token");

        let mut state = self.inner.state.write().await;
        state.user = cached;
        state.token = None;
        state.status = SessionStatus::Anonymous;
        self.inner.status_tx.send_replace(SessionStatus::Anonymous);
        SessionStatus::Anonymous
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let grant = self.inner.auth.login(email, password).await.map_err(|e| {
            debug!(error = %e, "Login rejected");
            ClientError::from(e)
        })?;

        self.persist_grant(&grant)?;

        info!(user_id = %grant.user.id, "Logged in");
        self.establish(grant.user.clone(), grant.token).await;
        Ok(grant.user)
    }

    /// Create an account, then log into it.
    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || password.is_empty() || name.is_empty() {
            return Err(ClientError::Validation(
                "Email, password and name are required".to_string(),
            ));
        }
        if !email.contains('@') {
            return Err(ClientError::Validation("Invalid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ClientError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user = self
            .inner
            .auth
            .register(email, password, name)
            .await
            .map_err(ClientError::from)?;
        debug!(user_id = %user.id, "Account created");

        self.login(email, password).await
    }

    /// End the session. Never fails: local state is cleared before the
    /// best-effort server call, so work still in flight sees a new
    /// generation by the time that call suspends.
    pub async fn logout(&self) {
        if let Some(token) = self.end_local().await {
            self.logout_remote(&token).await;
        }
    }

    /// Clear the session locally and hand back the token it held, for a
    /// later [`logout_remote`](Self::logout_remote).
    pub async fn end_local(&self) -> Option<String> {
        let token = self.inner.state.read().await.token.clone();
        self.clear().await;
        info!("Logged out");
        token
    }

    /// Tell the service a token is no longer in use. Best-effort.
    pub async fn logout_remote(&self, token: &str) {
        if let Err(e) = self.inner.auth.logout(token).await {
            warn!(error = %e, "Logout request failed, local session already cleared");
        }
    }

    /// Demote after a rejected credential: clears the stored token and
    /// cached user and lands in `Anonymous`.
    pub async fn invalidate(&self) {
        self.publish(SessionStatus::Invalid).await;
        self.clear().await;
    }

    // ===== Internals =====

    /// Store the token and user together. If the user cannot be written the
    /// previous token is put back.
    fn persist_grant(&self, grant: &LoginGrant) -> Result<()> {
        let store = &self.inner.store;
        let previous = store.token().unwrap_or_default();
        store.set_token(&grant.token)?;

        if let Err(e) = store.set_cached_user(&grant.user) {
            let rollback = match previous {
                Some(token) => store.set_token(&token),
                None => store.clear_token(),
            };
            if let Err(rollback_err) = rollback {
                warn!(error = %rollback_err, "Failed to restore previous token");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn establish(&self, user: User, token: String) {
        let mut state = self.inner.state.write().await;
        state.user = Some(user);
        state.token = Some(token);
        state.status = SessionStatus::Authenticated;
        state.generation += 1;
        self.inner.status_tx.send_replace(SessionStatus::Authenticated);
    }

    async fn clear(&self) {
        if let Err(e) = self.inner.store.clear_session() {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        let mut state = self.inner.state.write().await;
        state.user = None;
        state.token = None;
        state.status = SessionStatus::Anonymous;
        state.generation += 1;
        self.inner.status_tx.send_replace(SessionStatus::Anonymous);
    }

    async fn publish(&self, status: SessionStatus) {
        self.inner.state.write().await.status = status;
        self.inner.status_tx.send_replace(status);
    }
}

//! Background task that keeps the registry within retention while the user
//! is idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::EnhancementRecord;

use super::ResourceRegistry;

/// How often the sweeper re-checks retention.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sent after a tick that removed at least one record.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub removed: Vec<EnhancementRecord>,
    pub remaining: usize,
}

/// Handle to a running sweeper task. Dropping the handle does not stop the
/// task; call [`ExpirySweeper::stop`].
pub struct ExpirySweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn start(
        registry: Arc<ResourceRegistry>,
        period: Duration,
        reports: Option<mpsc::Sender<SweepReport>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(registry, period, reports, cancel.clone()));
        debug!(period_secs = period.as_secs(), "Expiry sweeper started");
        Self { cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task and wait for it to finish its current tick.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Expiry sweeper task ended abnormally");
        }
        debug!("Expiry sweeper stopped");
    }
}

async fn run(
    registry: Arc<ResourceRegistry>,
    period: Duration,
    reports: Option<mpsc::Sender<SweepReport>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; `load` has just filtered the set.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match registry.purge_expired().await {
                    Ok(removed) if removed.is_empty() => {}
                    Ok(removed) => {
                        if let Some(tx) = &reports {
                            let remaining = registry.len().await;
                            if tx.send(SweepReport { removed, remaining }).await.is_err() {
                                debug!("Sweep report receiver dropped");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, SessionManager};
    use crate::models::ImageUpload;
    use crate::testing::{user, FakeAuth, FakeEnhancer, ManualClock};
    use chrono::Utc;

    async fn registry_with_record() -> (Arc<ResourceRegistry>, ManualClock) {
        let store = CredentialStore::in_memory();
        let session = SessionManager::new(
            Arc::new(FakeAuth::new().with_account(user("1"))),
            store.clone(),
        );
        let clock = ManualClock::new(Utc::now());
        let registry = Arc::new(ResourceRegistry::new(
            session.clone(),
            store,
            Arc::new(FakeEnhancer::new()),
            Arc::new(clock.clone()),
        ));
        session.login("user1@example.com", "secret1").await.unwrap();
        registry.load().await.unwrap();
        registry
            .enhance(&ImageUpload::new("a.png", "image/png", vec![1, 2, 3]))
            .await
            .unwrap();
        (registry, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_purges_expired_records() {
        let (registry, clock) = registry_with_record().await;
        let (tx, mut rx) = mpsc::channel(4);
        let sweeper = ExpirySweeper::start(registry.clone(), DEFAULT_SWEEP_INTERVAL, Some(tx));

        clock.advance(chrono::Duration::hours(24));
        let report = rx.recv().await.unwrap();

        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.remaining, 0);
        assert!(registry.is_empty().await);
        assert!(sweeper.is_running());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_keeps_valid_records() {
        let (registry, clock) = registry_with_record().await;
        let sweeper = ExpirySweeper::start(registry.clone(), DEFAULT_SWEEP_INTERVAL, None);

        clock.advance(chrono::Duration::hours(23));
        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL * 3).await;

        assert_eq!(registry.len().await, 1);
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let (registry, clock) = registry_with_record().await;
        let (tx, mut rx) = mpsc::channel(4);
        let sweeper = ExpirySweeper::start(registry.clone(), DEFAULT_SWEEP_INTERVAL, Some(tx));

        sweeper.stop().await;
        clock.advance(chrono::Duration::hours(48));
        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL * 2).await;

        // Sender dropped with the task, and nothing was purged.
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.len().await, 1);
    }
}

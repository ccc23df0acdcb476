//! Maintenance operations: the periodic expiry sweep and account purge.
//!
//! The sweep is the batch analogue of the status service's lazy recompute:
//! it flips records whose paid term has ended without waiting for anyone to
//! read them. An external scheduler drives it, either by calling
//! [`Maintenance::sweep`] directly or by running a [`SweepWorker`].

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::SweepConfig;
use crate::error::Result;
use crate::status::StatusCache;
use crate::store::SubscriptionStore;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Rows matching the stale predicate.
    pub scanned: usize,
    /// Rows flipped to expired.
    pub expired: usize,
    /// Rows skipped after losing a version race; the next pass catches them.
    pub skipped: usize,
}

/// Maintenance entry points for the scheduler collaborator.
#[derive(Clone)]
pub struct Maintenance<S: SubscriptionStore> {
    store: S,
    cache: Option<StatusCache>,
}

impl<S: SubscriptionStore> Maintenance<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store, cache: None }
    }

    /// Attach a status cache to invalidate for every touched user.
    #[must_use]
    pub fn with_cache(mut self, cache: StatusCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Expire every record whose paid term ended before now.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        self.sweep_at(Utc::now()).await
    }

    /// [`Maintenance::sweep`] with an explicit clock.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let stale = self.store.list_active_expired(now).await?;
        let mut outcome = SweepOutcome {
            scanned: stale.len(),
            ..SweepOutcome::default()
        };

        for current in stale {
            let mut updated = current.clone();
            updated.expired_at = Some(now);
            updated.recompute(now);
            updated.updated_at = now;
            updated.version = current.version + 1;

            if self.store.update(&updated, current.version).await? {
                outcome.expired += 1;
                if let Some(cache) = &self.cache {
                    cache.invalidate(&current.user_id).await;
                }
            } else {
                // A reconcile got there first; its state wins.
                outcome.skipped += 1;
                tracing::debug!(
                    target: "lectern::sweep",
                    user_id = %current.user_id,
                    record_id = %current.id,
                    "version race during sweep, row left for next pass"
                );
            }
        }

        if outcome.scanned > 0 {
            tracing::info!(
                target: "lectern::sweep",
                scanned = outcome.scanned,
                expired = outcome.expired,
                skipped = outcome.skipped,
                "expiry sweep finished"
            );
        }
        Ok(outcome)
    }

    /// Delete every record for a user. Account-deletion entry point; the
    /// core never removes rows through any other path.
    pub async fn purge_user(&self, user_id: &str) -> Result<usize> {
        let purged = self.store.purge_user(user_id).await?;
        if let Some(cache) = &self.cache {
            cache.invalidate(user_id).await;
        }
        tracing::info!(
            target: "lectern::sweep",
            user_id = %user_id,
            purged,
            "purged subscription records"
        );
        Ok(purged)
    }
}

/// Runs the sweep on a fixed interval until shut down.
pub struct SweepWorker<S: SubscriptionStore> {
    maintenance: Maintenance<S>,
    interval: std::time::Duration,
    shutdown_tx: mpsc::Sender<()>,
}

impl<S: SubscriptionStore> SweepWorker<S> {
    /// Create a worker; pass the receiver to [`SweepWorker::start`].
    pub fn new(maintenance: Maintenance<S>, config: &SweepConfig) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                maintenance,
                interval: config.interval(),
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Run until a shutdown signal arrives. Sweep failures are logged and
    /// the loop keeps going; storage errors here are transient.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            target: "lectern::sweep",
            interval_seconds = self.interval.as_secs(),
            "sweep worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = sleep(self.interval) => {
                    if let Err(e) = self.maintenance.sweep().await {
                        tracing::error!(
                            target: "lectern::sweep",
                            error = %e,
                            "sweep pass failed"
                        );
                    }
                }
            }
        }

        tracing::info!(target: "lectern::sweep", "sweep worker stopped");
    }

    /// Request shutdown of this worker.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

//! Subscription reconciliation.
//!
//! Merges normalized receipt facts into the authoritative per-user
//! subscription state. Reconciles for the same user are serialized through a
//! per-user lock; writes go through the store's compare-and-swap so that a
//! second instance racing on the same rows is detected and retried.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::ReconcileConfig;
use crate::error::{LecternError, Result};
use crate::receipt::ReceiptFact;
use crate::record::SubscriptionRecord;
use crate::status::StatusCache;
use crate::store::SubscriptionStore;

/// Reconciles receipt facts into subscription records.
///
/// Guarantees, per user:
/// - at most one record is active at any instant;
/// - replaying an identical fact changes nothing and inserts nothing;
/// - concurrent reconciles are serialized (in-process lock) or detected and
///   retried (cross-process, via the store's CAS).
#[derive(Clone)]
pub struct Reconciler<S: SubscriptionStore> {
    store: S,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    cache: Option<StatusCache>,
    config: ReconcileConfig,
}

impl<S: SubscriptionStore> Reconciler<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
            cache: None,
            config: ReconcileConfig::default(),
        }
    }

    /// Attach a status cache to invalidate on every successful reconcile.
    #[must_use]
    pub fn with_cache(mut self, cache: StatusCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Merge `fact` into the user's subscription state and return the final
    /// persisted record, derived fields included.
    pub async fn reconcile(&self, user_id: &str, fact: &ReceiptFact) -> Result<SubscriptionRecord> {
        self.reconcile_at(user_id, fact, Utc::now()).await
    }

    /// [`Reconciler::reconcile`] with an explicit clock, for deterministic
    /// callers and tests.
    pub async fn reconcile_at(
        &self,
        user_id: &str,
        fact: &ReceiptFact,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionRecord> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_reconcile(user_id, fact, now).await {
                Ok(record) => {
                    if let Some(cache) = &self.cache {
                        cache.invalidate(user_id).await;
                    }
                    return Ok(record);
                }
                Err(LecternError::ConcurrentModification { .. })
                    if attempt < self.config.max_attempts =>
                {
                    tracing::warn!(
                        target: "lectern::reconcile",
                        user_id = %user_id,
                        attempt,
                        "lost a version race, retrying"
                    );
                }
                Err(LecternError::ConcurrentModification { .. }) => {
                    tracing::error!(
                        target: "lectern::reconcile",
                        user_id = %user_id,
                        attempts = attempt,
                        "reconcile gave up after repeated version races"
                    );
                    return Err(LecternError::storage(format!(
                        "reconcile for user '{}' lost {} consecutive version races",
                        user_id, attempt
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One load-merge-write pass.
    ///
    /// Sibling rows are deactivated *before* the target row is written, so an
    /// interrupted pass can leave zero active rows but never two.
    async fn try_reconcile(
        &self,
        user_id: &str,
        fact: &ReceiptFact,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionRecord> {
        let existing = self.store.list_for_user(user_id).await?;

        match existing.iter().find(|r| r.matches_fact(fact)) {
            Some(current) => {
                let mut updated = current.clone();
                updated.apply_fact(fact);
                updated.recompute(now);

                if updated.same_observable_state(current) {
                    tracing::debug!(
                        target: "lectern::reconcile",
                        user_id = %user_id,
                        record_id = %current.id,
                        "duplicate receipt delivery, state unchanged"
                    );
                    return Ok(current.clone());
                }

                updated.updated_at = now;
                updated.version = current.version + 1;

                if updated.is_active {
                    self.store.deactivate_others(user_id, updated.id).await?;
                }
                if !self.store.update(&updated, current.version).await? {
                    return Err(LecternError::ConcurrentModification {
                        user_id: user_id.to_string(),
                    });
                }

                tracing::info!(
                    target: "lectern::reconcile",
                    user_id = %user_id,
                    record_id = %updated.id,
                    product_id = %updated.product_id,
                    is_active = updated.is_active,
                    "subscription updated"
                );
                Ok(updated)
            }
            None => {
                let mut record = SubscriptionRecord::from_fact(user_id, fact, now);
                record.recompute(now);

                if record.is_active {
                    self.store.deactivate_others(user_id, record.id).await?;
                }
                self.store.insert(&record).await?;

                tracing::info!(
                    target: "lectern::reconcile",
                    user_id = %user_id,
                    record_id = %record.id,
                    product_id = %record.product_id,
                    source = %record.purchase_source,
                    is_active = record.is_active,
                    "subscription created"
                );
                Ok(record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySubscriptionStore;
    use crate::receipt::PurchaseSource;
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    fn trial_fact(now: DateTime<Utc>) -> ReceiptFact {
        ReceiptFact {
            product_id: "bible.monthly.plan".to_string(),
            transaction_id: Some("txn_1".to_string()),
            original_transaction_id: Some("orig_1".to_string()),
            source: PurchaseSource::Ios,
            purchase_date: now,
            trial_start: Some(now),
            trial_end: Some(now + Duration::days(3)),
            renewal_date: None,
            cancel_date: None,
        }
    }

    #[tokio::test]
    async fn first_fact_inserts_active_record() {
        let store = InMemorySubscriptionStore::new();
        let reconciler = Reconciler::new(store.clone());
        let now = Utc::now();

        let record = reconciler
            .reconcile_at("u1", &trial_fact(now), now)
            .await
            .unwrap();

        assert!(record.is_active);
        assert!(!record.is_expired);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn identical_fact_is_a_no_op() {
        let store = InMemorySubscriptionStore::new();
        let reconciler = Reconciler::new(store.clone());
        let now = Utc::now();
        let fact = trial_fact(now);

        let first = reconciler.reconcile_at("u1", &fact, now).await.unwrap();
        let second = reconciler.reconcile_at("u1", &fact, now).await.unwrap();

        assert_eq!(store.record_count(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.version, second.version);
        assert!(first.same_observable_state(&second));
    }

    #[tokio::test]
    async fn conversion_updates_in_place() {
        let store = InMemorySubscriptionStore::new();
        let reconciler = Reconciler::new(store.clone());
        let now = Utc::now();

        reconciler
            .reconcile_at("u1", &trial_fact(now), now)
            .await
            .unwrap();

        // Paid conversion arrives with a new transaction id but the same
        // original transaction id.
        let conversion = ReceiptFact {
            product_id: "bible.monthly.plan".to_string(),
            transaction_id: Some("txn_2".to_string()),
            original_transaction_id: Some("orig_1".to_string()),
            source: PurchaseSource::Ios,
            purchase_date: now + Duration::days(3),
            trial_start: None,
            trial_end: None,
            renewal_date: Some(now + Duration::days(33)),
            cancel_date: None,
        };
        let record = reconciler
            .reconcile_at("u1", &conversion, now + Duration::days(3))
            .await
            .unwrap();

        assert_eq!(store.record_count(), 1);
        assert!(record.is_active);
        assert!(record.converted_after_trial);
        assert_eq!(record.trial_end, Some(now + Duration::days(3)));
    }

    #[tokio::test]
    async fn new_transaction_supersedes_old_record() {
        let store = InMemorySubscriptionStore::new();
        let reconciler = Reconciler::new(store.clone());
        let now = Utc::now();

        let mut first = trial_fact(now);
        first.trial_start = None;
        first.trial_end = None;
        first.renewal_date = Some(now + Duration::days(30));
        reconciler.reconcile_at("u1", &first, now).await.unwrap();

        // Re-subscription after a lapse: entirely new platform ids.
        let second = ReceiptFact {
            product_id: "bible.monthly.plan".to_string(),
            transaction_id: Some("txn_9".to_string()),
            original_transaction_id: Some("orig_9".to_string()),
            source: PurchaseSource::Ios,
            purchase_date: now + Duration::days(40),
            trial_start: None,
            trial_end: None,
            renewal_date: Some(now + Duration::days(70)),
            cancel_date: None,
        };
        reconciler
            .reconcile_at("u1", &second, now + Duration::days(40))
            .await
            .unwrap();

        let records = store.records_for_user("u1");
        assert_eq!(records.len(), 2);
        let active: Vec<_> = records.iter().filter(|r| r.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].transaction_id.as_deref(), Some("txn_9"));
    }

    #[tokio::test]
    async fn concurrent_reconciles_keep_single_active() {
        let store = InMemorySubscriptionStore::new();
        let reconciler = Arc::new(Reconciler::new(store.clone()));
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..8 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                let fact = ReceiptFact {
                    product_id: "bible.monthly.plan".to_string(),
                    transaction_id: Some(format!("txn_{i}")),
                    original_transaction_id: Some(format!("orig_{i}")),
                    source: PurchaseSource::Ios,
                    purchase_date: now,
                    trial_start: None,
                    trial_end: None,
                    renewal_date: Some(now + chrono::Duration::days(30)),
                    cancel_date: None,
                };
                reconciler.reconcile_at("u1", &fact, now).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let active = store
            .records_for_user("u1")
            .into_iter()
            .filter(|r| r.is_active)
            .count();
        assert_eq!(active, 1);
        assert_eq!(store.record_count(), 8);
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_reconcile() {
        use crate::config::StatusConfig;

        let store = InMemorySubscriptionStore::new();
        let cache = StatusCache::new(&StatusConfig::default());
        let reconciler = Reconciler::new(store).with_cache(cache.clone());
        let now = Utc::now();

        cache
            .insert(
                "u1".to_string(),
                crate::status::EntitlementStatus::none(),
            )
            .await;
        assert!(cache.get("u1").await.is_some());

        reconciler
            .reconcile_at("u1", &trial_fact(now), now)
            .await
            .unwrap();
        assert!(cache.get("u1").await.is_none());
    }

    /// Store whose CAS always reports a lost race.
    #[derive(Clone)]
    struct AlwaysConflictingStore {
        inner: InMemorySubscriptionStore,
    }

    #[async_trait]
    impl SubscriptionStore for AlwaysConflictingStore {
        async fn insert(&self, record: &SubscriptionRecord) -> Result<()> {
            self.inner.insert(record).await
        }

        async fn update(&self, _record: &SubscriptionRecord, _expected: u64) -> Result<bool> {
            Ok(false)
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionRecord>> {
            self.inner.list_for_user(user_id).await
        }

        async fn deactivate_others(&self, user_id: &str, keep_id: Uuid) -> Result<usize> {
            self.inner.deactivate_others(user_id, keep_id).await
        }

        async fn list_active_expired(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<SubscriptionRecord>> {
            self.inner.list_active_expired(now).await
        }

        async fn purge_user(&self, user_id: &str) -> Result<usize> {
            self.inner.purge_user(user_id).await
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_storage_error() {
        let inner = InMemorySubscriptionStore::new();
        let now = Utc::now();

        let reconciler = Reconciler::new(AlwaysConflictingStore {
            inner: inner.clone(),
        });
        reconciler
            .reconcile_at("u1", &trial_fact(now), now)
            .await
            .unwrap();

        // Second delivery mutates the record, forcing the CAS path, which
        // this store always fails.
        let mut changed = trial_fact(now);
        changed.cancel_date = Some(now + Duration::days(1));
        let err = reconciler
            .reconcile_at("u1", &changed, now)
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::Storage(_)));
    }
}

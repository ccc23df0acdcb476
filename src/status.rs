//! Status read path.
//!
//! What the app shell polls: `{is_active, subscription, days_until_expiry}`.
//! Reads never write back; a record whose stored flags have gone stale (the
//! renewal date passed since the last write) is corrected in the returned
//! view and left for the sweep to persist.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::config::StatusConfig;
use crate::entitlement::Derived;
use crate::error::Result;
use crate::record::SubscriptionRecord;
use crate::store::SubscriptionStore;

const SECONDS_PER_DAY: i64 = 86_400;

/// The entitlement view handed to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementStatus {
    pub is_active: bool,
    /// Whole days until the current term ends, rounded up. `None` when the
    /// user has no running trial or paid term.
    pub days_until_expiry: Option<i64>,
    pub subscription: Option<SubscriptionRecord>,
}

impl EntitlementStatus {
    /// The status of a user with no subscription history.
    #[must_use]
    pub fn none() -> Self {
        Self {
            is_active: false,
            days_until_expiry: None,
            subscription: None,
        }
    }
}

/// TTL-bounded per-user status cache.
///
/// Cheap to clone; hand one clone to the [`crate::reconcile::Reconciler`]
/// and the [`crate::sweep::Maintenance`] so every successful write
/// invalidates the user's entry. Caches are per-instance and never assumed
/// correct across instances.
#[derive(Clone)]
pub struct StatusCache {
    inner: Cache<String, EntitlementStatus>,
}

impl StatusCache {
    #[must_use]
    pub fn new(config: &StatusConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl())
            .build();
        Self { inner }
    }

    pub async fn get(&self, user_id: &str) -> Option<EntitlementStatus> {
        self.inner.get(user_id).await
    }

    pub async fn insert(&self, user_id: String, status: EntitlementStatus) {
        self.inner.insert(user_id, status).await;
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.inner.invalidate(user_id).await;
    }
}

/// Read-side service over the subscription store.
pub struct StatusService<S: SubscriptionStore> {
    store: S,
    cache: Option<StatusCache>,
}

impl<S: SubscriptionStore> StatusService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store, cache: None }
    }

    /// Serve from the cache when possible.
    #[must_use]
    pub fn with_cache(mut self, cache: StatusCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Current entitlement status, cache-first.
    pub async fn status(&self, user_id: &str) -> Result<EntitlementStatus> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(user_id).await {
                return Ok(hit);
            }
        }
        self.refresh(user_id).await
    }

    /// Force a re-read from storage, repopulating the cache.
    pub async fn refresh(&self, user_id: &str) -> Result<EntitlementStatus> {
        let status = self.status_at(user_id, Utc::now()).await?;
        if let Some(cache) = &self.cache {
            cache.insert(user_id.to_string(), status.clone()).await;
        }
        Ok(status)
    }

    /// Compute the status as of an explicit `now`, bypassing the cache.
    pub async fn status_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<EntitlementStatus> {
        let Some(mut record) = self.store.latest_for_user(user_id).await? else {
            return Ok(EntitlementStatus::none());
        };

        let timeline = record.timeline();
        let derived = Derived::compute(&timeline, now);
        if derived != record.derived() {
            // Stored flags lag reality between writes; correct the view and
            // let the sweep persist the change.
            tracing::debug!(
                target: "lectern::status",
                user_id = %user_id,
                record_id = %record.id,
                "stored entitlement flags stale, recomputed on read"
            );
            record.apply_derived(&derived);
        }

        let days_until_expiry = if derived.is_active {
            let expiry = if timeline.trial_active(now) {
                timeline.trial_end
            } else {
                timeline.renewal_date
            };
            expiry.map(|e| days_until(e, now))
        } else {
            None
        };

        Ok(EntitlementStatus {
            is_active: derived.is_active,
            days_until_expiry,
            subscription: Some(record),
        })
    }
}

/// Whole days from `now` to `expiry`, rounded up. `expiry` is in the future
/// whenever this is called (the record is active).
fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (expiry - now).num_seconds();
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

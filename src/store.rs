//! Storage trait for subscription records.
//!
//! Implement this trait to persist subscriptions to your database. The
//! reconciler, status service, and sweep all depend on it and nothing else;
//! there is no global client. An in-memory implementation ships in
//! [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::record::SubscriptionRecord;

/// Repository for subscription records, keyed by `user_id` (not unique:
/// multiple historical rows per user are expected).
///
/// # Compare-and-swap
///
/// [`SubscriptionStore::update`] must be atomic with respect to concurrent
/// writers: persist the record only if the stored row's `version` still
/// equals `expected_version`, and report the outcome. For SQL backends this
/// is the usual conditional update:
///
/// ```sql
/// UPDATE subscriptions SET ..., version = version + 1
/// WHERE id = $1 AND version = $2
/// ```
///
/// Row found: `Ok(true)`. No row matched: `Ok(false)` - the reconciler
/// treats that as a lost race and retries from the read.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Conditionally replace the record with `record.id`, only if the stored
    /// version equals `expected_version`. Returns `Ok(false)` on a version
    /// miss (including a row that no longer exists).
    async fn update(&self, record: &SubscriptionRecord, expected_version: u64) -> Result<bool>;

    /// All records for a user, most recent first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionRecord>>;

    /// The most recent record for a user, if any.
    async fn latest_for_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        Ok(self.list_for_user(user_id).await?.into_iter().next())
    }

    /// Bulk conditional update: clear `is_active`/`is_premium` on every
    /// record of `user_id` except `keep_id`. Returns how many rows changed.
    async fn deactivate_others(&self, user_id: &str, keep_id: Uuid) -> Result<usize>;

    /// Records still marked active whose paid term ended before `now`.
    /// Input to the periodic sweep.
    async fn list_active_expired(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>>;

    /// Delete every record for a user. Only the account-deletion path calls
    /// this; the core never deletes records otherwise.
    async fn purge_user(&self, user_id: &str) -> Result<usize>;
}

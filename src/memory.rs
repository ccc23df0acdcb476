//! In-memory subscription store.
//!
//! The default backend for single-process deployments and the test double
//! for everything else. Wraps its state in `Arc` so clones share storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{LecternError, Result};
use crate::record::SubscriptionRecord;
use crate::store::SubscriptionStore;

type Rows = HashMap<String, Vec<SubscriptionRecord>>;

/// In-memory [`SubscriptionStore`] implementation.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    inner: Arc<RwLock<Rows>>,
}

impl InMemorySubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Rows>> {
        self.inner
            .read()
            .map_err(|_| LecternError::storage("subscription store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Rows>> {
        self.inner
            .write()
            .map_err(|_| LecternError::storage("subscription store lock poisoned"))
    }

    /// Total number of stored records, across all users (for tests).
    pub fn record_count(&self) -> usize {
        self.inner
            .read()
            .map(|rows| rows.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// All records for a user in insertion order (for tests).
    pub fn records_for_user(&self, user_id: &str) -> Vec<SubscriptionRecord> {
        self.inner
            .read()
            .map(|rows| rows.get(user_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, record: &SubscriptionRecord) -> Result<()> {
        let mut rows = self.write()?;
        rows.entry(record.user_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &SubscriptionRecord, expected_version: u64) -> Result<bool> {
        let mut rows = self.write()?;
        let Some(user_rows) = rows.get_mut(&record.user_id) else {
            return Ok(false);
        };
        let Some(stored) = user_rows.iter_mut().find(|r| r.id == record.id) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = record.clone();
        Ok(true)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionRecord>> {
        let rows = self.read()?;
        let mut records = rows.get(user_id).cloned().unwrap_or_default();
        // Reverse first so equal timestamps still order by insertion recency
        // under the stable sort.
        records.reverse();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn deactivate_others(&self, user_id: &str, keep_id: Uuid) -> Result<usize> {
        let now = Utc::now();
        let mut rows = self.write()?;
        let Some(user_rows) = rows.get_mut(user_id) else {
            return Ok(0);
        };
        let mut changed = 0;
        for record in user_rows
            .iter_mut()
            .filter(|r| r.id != keep_id && (r.is_active || r.is_premium))
        {
            record.is_active = false;
            record.is_premium = false;
            record.updated_at = now;
            record.version += 1;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_active_expired(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>> {
        let rows = self.read()?;
        Ok(rows
            .values()
            .flatten()
            .filter(|r| r.is_active && r.renewal_date.is_some_and(|renewal| renewal < now))
            .cloned()
            .collect())
    }

    async fn purge_user(&self, user_id: &str) -> Result<usize> {
        let mut rows = self.write()?;
        Ok(rows.remove(user_id).map(|records| records.len()).unwrap_or(0))
    }
}

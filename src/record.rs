//! The persisted subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entitlement::{Derived, Timeline};
use crate::receipt::{PurchaseSource, ReceiptFact};

/// One subscription row.
///
/// A user may accumulate multiple historical rows (lapses, re-subscriptions,
/// product switches), but the reconciler guarantees at most one of them is
/// active at any instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    /// Owned by the auth collaborator; never generated here.
    pub user_id: String,
    pub product_id: String,
    pub purchase_source: PurchaseSource,
    pub transaction_id: Option<String>,
    pub original_transaction_id: Option<String>,

    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub purchase_date: DateTime<Utc>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub cancel_date: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,

    // Derived fields, recomputed on every write. Callers never supply these.
    pub is_active: bool,
    pub is_premium: bool,
    pub is_expired: bool,
    pub trial_canceled: bool,
    pub converted_after_trial: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Maintained by the auth collaborator, carried here untouched.
    pub last_login: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, incremented on every write.
    pub version: u64,
}

impl SubscriptionRecord {
    /// Build a fresh record from a normalized fact. Derived fields start
    /// empty; the reconciler calls [`SubscriptionRecord::recompute`] before
    /// persisting.
    #[must_use]
    pub fn from_fact(user_id: &str, fact: &ReceiptFact, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            product_id: fact.product_id.clone(),
            purchase_source: fact.source,
            transaction_id: fact.transaction_id.clone(),
            original_transaction_id: fact.original_transaction_id.clone(),
            trial_start: fact.trial_start,
            trial_end: fact.trial_end,
            purchase_date: fact.purchase_date,
            renewal_date: fact.renewal_date,
            cancel_date: fact.cancel_date,
            expired_at: None,
            is_active: false,
            is_premium: false,
            is_expired: false,
            trial_canceled: false,
            converted_after_trial: false,
            created_at: now,
            updated_at: now,
            last_login: None,
            version: 0,
        }
    }

    /// Whether a fact refers to the same logical purchase as this record.
    ///
    /// Platform ids win: a matching transaction id or original transaction
    /// id is the same purchase. When either side carries no platform ids at
    /// all (receipt-blob-only restores, demo events), product equality is
    /// the fallback. A fact with a *different* transaction id for the same
    /// product is a new purchase that supersedes this record.
    #[must_use]
    pub fn matches_fact(&self, fact: &ReceiptFact) -> bool {
        if let (Some(mine), Some(theirs)) = (&self.transaction_id, &fact.transaction_id) {
            if mine == theirs {
                return true;
            }
        }
        if let (Some(mine), Some(theirs)) =
            (&self.original_transaction_id, &fact.original_transaction_id)
        {
            if mine == theirs {
                return true;
            }
        }

        let record_has_ids =
            self.transaction_id.is_some() || self.original_transaction_id.is_some();
        let fact_has_ids = fact.transaction_id.is_some() || fact.original_transaction_id.is_some();
        if !record_has_ids || !fact_has_ids {
            return self.product_id == fact.product_id;
        }

        false
    }

    /// Merge a fact into this record.
    ///
    /// `Some` fields overwrite, `None` fields keep the stored value: a
    /// conversion fact that carries no trial dates must not erase the
    /// recorded trial window, which `converted_after_trial` is derived from.
    /// The sweep's `expired_at` mark is cleared: fresh platform evidence
    /// supersedes it.
    pub fn apply_fact(&mut self, fact: &ReceiptFact) {
        self.product_id = fact.product_id.clone();
        self.purchase_source = fact.source;
        if fact.transaction_id.is_some() {
            self.transaction_id = fact.transaction_id.clone();
        }
        if fact.original_transaction_id.is_some() {
            self.original_transaction_id = fact.original_transaction_id.clone();
        }
        self.purchase_date = fact.purchase_date;
        if fact.trial_start.is_some() {
            self.trial_start = fact.trial_start;
        }
        if fact.trial_end.is_some() {
            self.trial_end = fact.trial_end;
        }
        if fact.renewal_date.is_some() {
            self.renewal_date = fact.renewal_date;
        }
        if fact.cancel_date.is_some() {
            self.cancel_date = fact.cancel_date;
        }
        self.expired_at = None;
    }

    /// Project the raw timestamps for the entitlement calculator.
    #[must_use]
    pub fn timeline(&self) -> Timeline {
        Timeline {
            purchase_date: self.purchase_date,
            trial_start: self.trial_start,
            trial_end: self.trial_end,
            renewal_date: self.renewal_date,
            cancel_date: self.cancel_date,
            expired_at: self.expired_at,
        }
    }

    /// The currently stored derived flags.
    #[must_use]
    pub fn derived(&self) -> Derived {
        Derived {
            is_active: self.is_active,
            is_premium: self.is_premium,
            is_expired: self.is_expired,
            trial_canceled: self.trial_canceled,
            converted_after_trial: self.converted_after_trial,
        }
    }

    pub fn apply_derived(&mut self, derived: &Derived) {
        self.is_active = derived.is_active;
        self.is_premium = derived.is_premium;
        self.is_expired = derived.is_expired;
        self.trial_canceled = derived.trial_canceled;
        self.converted_after_trial = derived.converted_after_trial;
    }

    /// Recompute derived fields in place as of `now`.
    pub fn recompute(&mut self, now: DateTime<Utc>) {
        let derived = Derived::compute(&self.timeline(), now);
        self.apply_derived(&derived);
    }

    /// Whether two records agree on everything a caller can observe: raw
    /// fields and derived flags. Bookkeeping (`updated_at`, `version`) is
    /// ignored so duplicate deliveries can be detected as true no-ops.
    #[must_use]
    pub fn same_observable_state(&self, other: &Self) -> bool {
        self.product_id == other.product_id
            && self.purchase_source == other.purchase_source
            && self.transaction_id == other.transaction_id
            && self.original_transaction_id == other.original_transaction_id
            && self.trial_start == other.trial_start
            && self.trial_end == other.trial_end
            && self.purchase_date == other.purchase_date
            && self.renewal_date == other.renewal_date
            && self.cancel_date == other.cancel_date
            && self.expired_at == other.expired_at
            && self.derived() == other.derived()
    }
}

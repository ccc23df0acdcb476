//! Entitlement calculation.
//!
//! Pure derivation of subscription state from raw timestamps. No I/O: both
//! the reconciler (before writing) and the status service (on read, to catch
//! staleness) call into here with an explicit `now`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The raw-timestamp view of a subscription, the sole input to derivation.
///
/// Both [`crate::receipt::ReceiptFact`] and
/// [`crate::record::SubscriptionRecord`] project into this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    pub purchase_date: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub cancel_date: Option<DateTime<Utc>>,
    /// Explicit expiry mark set by the periodic sweep. Overrides the
    /// timestamp formula when present.
    pub expired_at: Option<DateTime<Utc>>,
}

impl Timeline {
    /// Whether the trial was canceled (a cancellation at or before trial end).
    #[must_use]
    pub fn trial_canceled(&self) -> bool {
        match (self.cancel_date, self.trial_end) {
            (Some(canceled), Some(trial_end)) => canceled <= trial_end,
            _ => false,
        }
    }

    /// Whether `now` falls inside the trial window `[trial_start, trial_end)`
    /// and the trial was not canceled.
    #[must_use]
    pub fn trial_active(&self, now: DateTime<Utc>) -> bool {
        let in_window = match (self.trial_start, self.trial_end) {
            (Some(start), Some(end)) => now >= start && now < end,
            _ => false,
        };
        in_window && !self.trial_canceled()
    }

    /// Whether a paid term is running: a future renewal date and no
    /// cancellation on file.
    #[must_use]
    pub fn paid_active(&self, now: DateTime<Utc>) -> bool {
        self.cancel_date.is_none() && self.renewal_date.is_some_and(|renewal| now < renewal)
    }
}

/// Derived subscription state, recomputed on every write and on every read.
///
/// Never supplied by callers. `is_premium` mirrors `is_active` today and is
/// kept as a separate field for tiered plans later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derived {
    pub is_active: bool,
    pub is_premium: bool,
    pub is_expired: bool,
    pub trial_canceled: bool,
    pub converted_after_trial: bool,
}

impl Derived {
    /// Compute derived state as of `now`.
    ///
    /// All bounds are exclusive on the active side: at `now == trial_end` or
    /// `now == renewal_date` the subscription is already expired.
    #[must_use]
    pub fn compute(timeline: &Timeline, now: DateTime<Utc>) -> Self {
        let trial_canceled = timeline.trial_canceled();

        let mut is_active = timeline.trial_active(now) || timeline.paid_active(now);
        let mut is_expired =
            !is_active && timeline.renewal_date.is_some_and(|renewal| now >= renewal);

        // A sweep mark wins over the formula.
        if timeline.expired_at.is_some() {
            is_active = false;
            is_expired = true;
        }

        let converted_after_trial = timeline
            .trial_end
            .is_some_and(|trial_end| timeline.purchase_date >= trial_end);

        Self {
            is_active,
            is_premium: is_active,
            is_expired,
            trial_canceled,
            converted_after_trial,
        }
    }
}

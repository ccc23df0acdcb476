//! Receipt ingestion facade.
//!
//! One entry point for the platform purchase listener: normalize the raw
//! event, then reconcile it. Incomplete (pending) events short-circuit
//! without touching storage and without an error.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::receipt::{normalize, Normalization, PurchaseSource, RawPurchaseEvent};
use crate::reconcile::Reconciler;
use crate::record::SubscriptionRecord;
use crate::store::SubscriptionStore;

/// Outcome of processing one raw purchase event.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum IngestOutcome {
    /// The event was reconciled into this record.
    Reconciled(SubscriptionRecord),
    /// The event was a pending transaction with nothing to persist yet. The
    /// platform will redeliver it once it completes.
    Skipped,
}

impl IngestOutcome {
    #[must_use]
    pub fn record(&self) -> Option<&SubscriptionRecord> {
        match self {
            Self::Reconciled(record) => Some(record),
            Self::Skipped => None,
        }
    }
}

/// Processes raw purchase/restore events end to end.
pub struct ReceiptProcessor<S: SubscriptionStore> {
    reconciler: Reconciler<S>,
}

impl<S: SubscriptionStore> ReceiptProcessor<S> {
    #[must_use]
    pub fn new(reconciler: Reconciler<S>) -> Self {
        Self { reconciler }
    }

    /// Normalize and reconcile one event for `user_id`.
    pub async fn process(
        &self,
        user_id: &str,
        event: &RawPurchaseEvent,
        source: PurchaseSource,
    ) -> Result<IngestOutcome> {
        self.process_at(user_id, event, source, Utc::now()).await
    }

    /// [`ReceiptProcessor::process`] with an explicit clock.
    pub async fn process_at(
        &self,
        user_id: &str,
        event: &RawPurchaseEvent,
        source: PurchaseSource,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        match normalize(event, source, now)? {
            Normalization::Incomplete => {
                tracing::debug!(
                    target: "lectern::ingest",
                    user_id = %user_id,
                    source = %source,
                    "event has no transaction ids or receipt yet, skipped"
                );
                Ok(IngestOutcome::Skipped)
            }
            Normalization::Fact(fact) => {
                let record = self.reconciler.reconcile_at(user_id, &fact, now).await?;
                Ok(IngestOutcome::Reconciled(record))
            }
        }
    }
}

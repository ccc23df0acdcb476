//! Receipt normalization.
//!
//! Turns raw purchase/restore events from the platform listener into
//! canonical [`ReceiptFact`]s. Real purchases, restored purchases, and demo
//! purchases all flow through the same pipeline; the only difference is the
//! [`PurchaseSource`] tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a purchase event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseSource {
    Ios,
    Android,
    /// Synthetic purchases from the demo/sandbox flow. Processed exactly
    /// like store purchases so demo state and real state cannot diverge.
    Demo,
}

impl PurchaseSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Demo => "demo",
        }
    }
}

impl fmt::Display for PurchaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw purchase/restore event as delivered by the platform listener.
///
/// Every field is optional: pending transactions arrive without receipts or
/// transaction ids, and demo events carry synthetic subsets. Timestamps are
/// epoch milliseconds, which is what both store SDKs emit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPurchaseEvent {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Opaque receipt blob, when the platform attaches one.
    #[serde(default)]
    pub receipt_data: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub purchase_date: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_trial: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub cancellation_date: Option<DateTime<Utc>>,
}

impl RawPurchaseEvent {
    /// Parse an event out of an untyped JSON payload.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ReceiptError> {
        serde_json::from_value(value).map_err(|e| ReceiptError::MalformedPayload {
            message: e.to_string(),
        })
    }
}

/// Canonical representation of one purchase event.
///
/// Guaranteed by [`normalize`]: `product_id` is non-empty and at least one
/// of `transaction_id`, `original_transaction_id`, or a receipt blob was
/// present on the source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFact {
    pub product_id: String,
    pub transaction_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub source: PurchaseSource,
    pub purchase_date: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub cancel_date: Option<DateTime<Utc>>,
}

/// Result of normalizing a raw event.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Normalization {
    /// A usable fact, ready for reconciliation.
    Fact(ReceiptFact),
    /// The event carries no transaction id and no receipt. Pending
    /// transactions legitimately look like this; the caller should drop the
    /// event without persisting anything and without reporting failure.
    Incomplete,
}

impl Normalization {
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    /// Unwrap the fact, discarding the incomplete case.
    #[must_use]
    pub fn into_fact(self) -> Option<ReceiptFact> {
        match self {
            Self::Fact(fact) => Some(fact),
            Self::Incomplete => None,
        }
    }
}

/// Errors raised while normalizing a raw event.
///
/// These are recoverable and local: the caller decides whether to drop or
/// retry the event. Nothing has been persisted when one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptError {
    /// The event names no product. Nothing can be reconciled from it.
    MissingProductId,
    /// The payload could not be decoded at all.
    MalformedPayload { message: String },
}

impl fmt::Display for ReceiptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProductId => write!(f, "purchase event has no product id"),
            Self::MalformedPayload { message } => {
                write!(f, "malformed purchase event: {}", message)
            }
        }
    }
}

impl std::error::Error for ReceiptError {}

/// Normalize a raw platform event into a [`ReceiptFact`].
///
/// `now` is the fallback purchase timestamp for events that omit one, passed
/// in so normalization stays deterministic.
///
/// Rules:
/// - a missing or empty product id is an error;
/// - an event with no transaction id, no original transaction id, and no
///   receipt blob is [`Normalization::Incomplete`], not an error;
/// - a trial flag plus an expiration maps to a trial window
///   `[purchase_date, expiration)`;
/// - an expiration without the trial flag is the paid term's renewal date;
/// - a cancellation timestamp is carried through as `cancel_date`.
pub fn normalize(
    event: &RawPurchaseEvent,
    source: PurchaseSource,
    now: DateTime<Utc>,
) -> Result<Normalization, ReceiptError> {
    let product_id = match event.product_id.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Err(ReceiptError::MissingProductId),
    };

    let has_receipt = event.receipt_data.as_deref().is_some_and(|r| !r.is_empty());
    if event.transaction_id.is_none() && event.original_transaction_id.is_none() && !has_receipt {
        return Ok(Normalization::Incomplete);
    }

    let purchase_date = event.purchase_date.unwrap_or(now);

    let (trial_start, trial_end, renewal_date) = match (event.is_trial, event.expiration_date) {
        (true, Some(expiration)) => (Some(purchase_date), Some(expiration), None),
        (false, Some(expiration)) => (None, None, Some(expiration)),
        _ => (None, None, None),
    };

    Ok(Normalization::Fact(ReceiptFact {
        product_id,
        transaction_id: event.transaction_id.clone(),
        original_transaction_id: event.original_transaction_id.clone(),
        source,
        purchase_date,
        trial_start,
        trial_end,
        renewal_date,
        cancel_date: event.cancellation_date,
    }))
}

//! Lectern - subscription entitlement reconciliation for mobile reading apps.
//!
//! Lectern ingests platform purchase-receipt events (real, restored, or
//! demo), collapses them into a single authoritative per-user subscription
//! record, and serves the derived entitlement view the app polls. It is a
//! library with no UI, HTTP, or database bindings of its own: auth, storage,
//! the platform purchase listener, and the scheduler are collaborators
//! injected at the seams.
//!
//! # Components
//!
//! - [`receipt`]: normalizes loosely-typed purchase events into
//!   [`ReceiptFact`]s.
//! - [`entitlement`]: pure derivation of `is_active`/`is_expired`/trial
//!   flags from raw timestamps.
//! - [`reconcile`]: merges facts into stored records, enforcing the
//!   single-active-record invariant with per-user serialization and
//!   compare-and-swap writes.
//! - [`status`]: the `{is_active, subscription, days_until_expiry}` read
//!   path, with an optional TTL cache.
//! - [`sweep`]: the periodic expiry sweep and account purge.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lectern::{
//!     InMemorySubscriptionStore, PurchaseSource, RawPurchaseEvent, ReceiptProcessor,
//!     Reconciler, StatusService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> lectern::Result<()> {
//!     lectern::init_tracing();
//!
//!     let store = InMemorySubscriptionStore::new();
//!     let processor = ReceiptProcessor::new(Reconciler::new(store.clone()));
//!
//!     let event = RawPurchaseEvent {
//!         product_id: Some("bible.monthly.plan".to_string()),
//!         transaction_id: Some("txn_1".to_string()),
//!         ..Default::default()
//!     };
//!     let outcome = processor.process("user_1", &event, PurchaseSource::Ios).await?;
//!     println!("reconciled: {:?}", outcome.record().map(|r| r.id));
//!
//!     let status = StatusService::new(store).status("user_1").await?;
//!     println!("active: {}", status.is_active);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entitlement;
mod error;
pub mod ingest;
pub mod memory;
pub mod receipt;
pub mod reconcile;
pub mod record;
pub mod status;
pub mod store;
pub mod sweep;

// Re-exports for the public API.
pub use config::{LecternConfig, LoggingConfig, ReconcileConfig, StatusConfig, SweepConfig};
pub use entitlement::{Derived, Timeline};
pub use error::{LecternError, Result};
pub use ingest::{IngestOutcome, ReceiptProcessor};
pub use memory::InMemorySubscriptionStore;
pub use receipt::{
    normalize, Normalization, PurchaseSource, RawPurchaseEvent, ReceiptError, ReceiptFact,
};
pub use reconcile::Reconciler;
pub use record::SubscriptionRecord;
pub use status::{EntitlementStatus, StatusCache, StatusService};
pub use store::SubscriptionStore;
pub use sweep::{Maintenance, SweepOutcome, SweepWorker};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call this early, before constructing any lectern components.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (e.g. "info", "lectern=debug")
/// - `LECTERN_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("LECTERN_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a [`LoggingConfig`].
pub fn init_tracing_with_config(config: &LoggingConfig) {
    let env_filter = EnvFilter::new(&config.level);

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

//! End-to-end scenarios: platform event in, entitlement view out.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use lectern::{
    IngestOutcome, InMemorySubscriptionStore, Maintenance, PurchaseSource, RawPurchaseEvent,
    ReceiptProcessor, Reconciler, StatusCache, StatusConfig, StatusService, SubscriptionStore,
};

struct Harness {
    store: InMemorySubscriptionStore,
    processor: ReceiptProcessor<InMemorySubscriptionStore>,
    status: StatusService<InMemorySubscriptionStore>,
    maintenance: Maintenance<InMemorySubscriptionStore>,
}

fn harness() -> Harness {
    let store = InMemorySubscriptionStore::new();
    let cache = StatusCache::new(&StatusConfig::default());
    Harness {
        store: store.clone(),
        processor: ReceiptProcessor::new(
            Reconciler::new(store.clone()).with_cache(cache.clone()),
        ),
        status: StatusService::new(store.clone()).with_cache(cache.clone()),
        maintenance: Maintenance::new(store).with_cache(cache),
    }
}

fn trial_event(now: DateTime<Utc>) -> RawPurchaseEvent {
    RawPurchaseEvent {
        product_id: Some("bible.monthly.plan".to_string()),
        transaction_id: Some("txn_trial".to_string()),
        original_transaction_id: Some("orig_1".to_string()),
        purchase_date: Some(now),
        expiration_date: Some(now + Duration::days(3)),
        is_trial: true,
        ..Default::default()
    }
}

fn conversion_event(now: DateTime<Utc>) -> RawPurchaseEvent {
    RawPurchaseEvent {
        product_id: Some("bible.monthly.plan".to_string()),
        transaction_id: Some("txn_paid".to_string()),
        original_transaction_id: Some("orig_1".to_string()),
        purchase_date: Some(now + Duration::days(3)),
        expiration_date: Some(now + Duration::days(33)),
        ..Default::default()
    }
}

#[tokio::test]
async fn fresh_trial_reports_three_days() {
    let h = harness();
    let now = Utc::now();

    h.processor
        .process_at("u1", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();

    let status = h.status.status_at("u1", now).await.unwrap();
    assert!(status.is_active);
    assert_eq!(status.days_until_expiry, Some(3));
    let record = status.subscription.unwrap();
    assert_eq!(record.trial_end, Some(now + Duration::days(3)));
    assert!(!record.converted_after_trial);
}

#[tokio::test]
async fn trial_conversion_keeps_one_record() {
    let h = harness();
    let now = Utc::now();

    h.processor
        .process_at("u1", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();
    h.processor
        .process_at(
            "u1",
            &conversion_event(now),
            PurchaseSource::Ios,
            now + Duration::days(3),
        )
        .await
        .unwrap();

    assert_eq!(h.store.record_count(), 1);
    let status = h
        .status
        .status_at("u1", now + Duration::days(3))
        .await
        .unwrap();
    assert!(status.is_active);
    assert_eq!(status.days_until_expiry, Some(30));
    let record = status.subscription.unwrap();
    assert!(record.converted_after_trial);
    assert!(!record.trial_canceled);
}

#[tokio::test]
async fn duplicate_restore_changes_nothing() {
    let h = harness();
    let now = Utc::now();

    h.processor
        .process_at("u1", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();
    h.processor
        .process_at(
            "u1",
            &conversion_event(now),
            PurchaseSource::Ios,
            now + Duration::days(3),
        )
        .await
        .unwrap();

    let before = h.store.records_for_user("u1");

    // The restore path redelivers the same purchase twice.
    for _ in 0..2 {
        let outcome = h
            .processor
            .process_at(
                "u1",
                &conversion_event(now),
                PurchaseSource::Ios,
                now + Duration::days(4),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Reconciled(_)));
    }

    let after = h.store.records_for_user("u1");
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].version, before[0].version);
    assert!(after[0].same_observable_state(&before[0]));
}

#[tokio::test]
async fn sweep_expires_without_a_client_read() {
    let h = harness();
    let now = Utc::now();

    h.processor
        .process_at("u1", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();
    h.processor
        .process_at(
            "u1",
            &conversion_event(now),
            PurchaseSource::Ios,
            now + Duration::days(3),
        )
        .await
        .unwrap();

    // One second past the renewal date, no read in between.
    let outcome = h
        .maintenance
        .sweep_at(now + Duration::days(33) + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(outcome.expired, 1);

    let stored = h.store.latest_for_user("u1").await.unwrap().unwrap();
    assert!(stored.is_expired);
    assert!(!stored.is_active);

    let status = h
        .status
        .status_at("u1", now + Duration::days(34))
        .await
        .unwrap();
    assert!(!status.is_active);
    assert_eq!(status.days_until_expiry, None);
}

#[tokio::test]
async fn pending_then_complete_purchase() {
    let h = harness();
    let now = Utc::now();

    // The platform fires an early event before the receipt exists.
    let pending = RawPurchaseEvent {
        product_id: Some("bible.monthly.plan".to_string()),
        purchase_date: Some(now),
        ..Default::default()
    };
    let outcome = h
        .processor
        .process_at("u1", &pending, PurchaseSource::Android, now)
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Skipped);
    assert_eq!(h.store.record_count(), 0);

    // The completed event follows.
    let completed = RawPurchaseEvent {
        product_id: Some("bible.monthly.plan".to_string()),
        transaction_id: Some("txn_1".to_string()),
        purchase_date: Some(now),
        expiration_date: Some(now + Duration::days(30)),
        ..Default::default()
    };
    h.processor
        .process_at("u1", &completed, PurchaseSource::Android, now)
        .await
        .unwrap();

    let status = h.status.status_at("u1", now).await.unwrap();
    assert!(status.is_active);
    assert_eq!(status.days_until_expiry, Some(30));
}

#[tokio::test]
async fn demo_purchase_flows_like_a_real_one() {
    let h = harness();
    let now = Utc::now();

    let demo = RawPurchaseEvent {
        product_id: Some("bible.monthly.plan".to_string()),
        transaction_id: Some("demo_txn_1".to_string()),
        purchase_date: Some(now),
        expiration_date: Some(now + Duration::days(3)),
        is_trial: true,
        ..Default::default()
    };
    h.processor
        .process_at("u1", &demo, PurchaseSource::Demo, now)
        .await
        .unwrap();

    let status = h.status.status_at("u1", now).await.unwrap();
    assert!(status.is_active);
    assert_eq!(
        status.subscription.unwrap().purchase_source,
        PurchaseSource::Demo
    );
}

#[tokio::test]
async fn concurrent_purchases_leave_one_active_record() {
    let h = harness();
    let processor = Arc::new(h.processor);
    let now = Utc::now();

    let mut handles = Vec::new();
    for i in 0..10 {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            let event = RawPurchaseEvent {
                product_id: Some("bible.monthly.plan".to_string()),
                transaction_id: Some(format!("txn_{i}")),
                original_transaction_id: Some(format!("orig_{i}")),
                purchase_date: Some(now),
                expiration_date: Some(now + Duration::days(30)),
                ..Default::default()
            };
            processor
                .process_at("u1", &event, PurchaseSource::Ios, now)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let active = h
        .store
        .records_for_user("u1")
        .into_iter()
        .filter(|r| r.is_active)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn account_deletion_purges_everything() {
    let h = harness();
    let now = Utc::now();

    h.processor
        .process_at("u1", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();
    h.processor
        .process_at("u2", &trial_event(now), PurchaseSource::Ios, now)
        .await
        .unwrap();

    assert_eq!(h.maintenance.purge_user("u1").await.unwrap(), 1);
    assert_eq!(h.store.record_count(), 1);

    let status = h.status.refresh("u1").await.unwrap();
    assert!(!status.is_active);
    assert!(status.subscription.is_none());
}

// Reconciliation behavior: idempotent ingestion, price-drop monotonicity,
// duplicate suppression and spam flagging, exercised against an in-memory
// store with no live browser involved.

use rust_decimal::Decimal;
use std::str::FromStr;

use adscout::extract::{extract_listings, ExtractedListing};
use adscout::hashing;
use adscout::models::ChangeKind;

use super::*;

fn record(external_id: &str, price: Option<&str>) -> ExtractedListing {
    ExtractedListing {
        external_id: external_id.to_string(),
        title: "Audi A4".to_string(),
        price: price.map(|p| Decimal::from_str(p).unwrap()),
        currency: "PLN".to_string(),
        location: Some("Warszawa".to_string()),
        url: format!("https://www.olx.pl/d/oferta/{}", external_id),
        image_url: None,
        phone: None,
    }
}

#[tokio::test]
async fn test_new_listing_inserts_and_emits() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    let change = ctx
        .worker
        .reconcile_record(&job, &record("abc123", Some("45000")))
        .await
        .unwrap();
    assert_eq!(change, Some(ChangeKind::NewListing));

    let primary = hashing::primary_hash(&job.source_id, "abc123");
    let stored = ctx
        .store
        .find_listing_by_primary_hash(&primary)
        .await
        .unwrap()
        .expect("listing stored");
    assert_eq!(stored.title, "Audi A4");
    assert_eq!(stored.price, Some(Decimal::from_str("45000").unwrap()));
    assert!(stored.previous_price.is_none());
    assert!(!stored.semantic_hash.is_empty());

    settle().await;
    let events = ctx.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::NewListing);
    assert_eq!(events[0].user_id, "user-1");
    assert_eq!(events[0].listing_id, stored.id);
}

#[tokio::test]
async fn test_reconciling_twice_yields_one_listing_one_event() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);
    let rec = record("abc123", Some("45000"));

    let first = ctx.worker.reconcile_record(&job, &rec).await.unwrap();
    let second = ctx.worker.reconcile_record(&job, &rec).await.unwrap();

    assert_eq!(first, Some(ChangeKind::NewListing));
    assert_eq!(second, None);

    settle().await;
    assert_eq!(ctx.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_idempotent_ingestion_across_many_runs() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);
    let rec = record("abc123", Some("45000"));

    for _ in 0..5 {
        ctx.worker.reconcile_record(&job, &rec).await.unwrap();
    }

    settle().await;
    assert_eq!(ctx.notifier.events().len(), 1);

    let primary = hashing::primary_hash(&job.source_id, "abc123");
    let stored = ctx
        .store
        .find_listing_by_primary_hash(&primary)
        .await
        .unwrap()
        .unwrap();
    // Unchanged price: no update either.
    assert_eq!(stored.price, Some(Decimal::from_str("45000").unwrap()));
    assert!(stored.previous_price.is_none());
}

#[tokio::test]
async fn test_price_drop_updates_and_emits_once() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    ctx.worker
        .reconcile_record(&job, &record("abc123", Some("45000")))
        .await
        .unwrap();

    let change = ctx
        .worker
        .reconcile_record(&job, &record("abc123", Some("42000")))
        .await
        .unwrap();
    assert_eq!(change, Some(ChangeKind::PriceDrop));

    let primary = hashing::primary_hash(&job.source_id, "abc123");
    let stored = ctx
        .store
        .find_listing_by_primary_hash(&primary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.price, Some(Decimal::from_str("42000").unwrap()));
    assert_eq!(
        stored.previous_price,
        Some(Decimal::from_str("45000").unwrap())
    );

    settle().await;
    let events = ctx.notifier.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].kind, ChangeKind::PriceDrop);
}

#[tokio::test]
async fn test_price_increase_and_equal_price_are_noops() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    ctx.worker
        .reconcile_record(&job, &record("abc123", Some("45000")))
        .await
        .unwrap();

    let higher = ctx
        .worker
        .reconcile_record(&job, &record("abc123", Some("47000")))
        .await
        .unwrap();
    let equal = ctx
        .worker
        .reconcile_record(&job, &record("abc123", Some("45000")))
        .await
        .unwrap();

    assert_eq!(higher, None);
    assert_eq!(equal, None);

    let primary = hashing::primary_hash(&job.source_id, "abc123");
    let stored = ctx
        .store
        .find_listing_by_primary_hash(&primary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.price, Some(Decimal::from_str("45000").unwrap()));
    assert!(stored.previous_price.is_none());

    settle().await;
    assert_eq!(ctx.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_priceless_records_never_drop() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    ctx.worker
        .reconcile_record(&job, &record("abc123", Some("45000")))
        .await
        .unwrap();
    let change = ctx
        .worker
        .reconcile_record(&job, &record("abc123", None))
        .await
        .unwrap();

    assert_eq!(change, None);
}

#[tokio::test]
async fn test_spam_title_is_stored_flagged_without_event() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    let mut spam = record("spam1", Some("100"));
    spam.title = "Replica watch, best quality".to_string();

    let change = ctx.worker.reconcile_record(&job, &spam).await.unwrap();
    assert_eq!(change, None);

    let primary = hashing::primary_hash(&job.source_id, "spam1");
    let stored = ctx
        .store
        .find_listing_by_primary_hash(&primary)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_spam);

    settle().await;
    assert!(ctx.notifier.events().is_empty());
}

#[tokio::test]
async fn test_extracted_page_reconciles_end_to_end() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let job = sample_job(&query, &source);

    let html = r#"
        <html><body>
            <div data-cy="l-card">
                <a href="/d/oferta/abc123">
                    <h6>Audi A4</h6>
                    <p data-testid="ad-price">45 000 zł</p>
                </a>
            </div>
        </body></html>
    "#;

    let records: Vec<_> =
        extract_listings(html, &job.source_name, "https://www.olx.pl/oferty/q-audi/", 50)
            .unwrap()
            .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].external_id, "abc123");
    assert_eq!(records[0].price, Some(Decimal::from_str("45000").unwrap()));

    let change = ctx
        .worker
        .reconcile_record(&job, &records[0])
        .await
        .unwrap();
    assert_eq!(change, Some(ChangeKind::NewListing));

    // Distinct (source, external id) pairs produce distinct identities.
    let this = hashing::primary_hash(&job.source_id, "abc123");
    let other = hashing::primary_hash(&job.source_id, "abc124");
    assert_ne!(this, other);

    settle().await;
    let events = ctx.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::NewListing);
    assert!(events[0].title.contains("Audi A4"));
}

// Scheduling passes against a real store and queue: due selection, schedule
// advancement with bounded jitter, and manual runs.

use chrono::{Duration as ChronoDuration, Utc};

use adscout::scheduler::QueryScheduler;

use super::*;

fn scheduler(ctx: &TestContext) -> QueryScheduler {
    QueryScheduler::new(
        ctx.store.clone(),
        ctx.queue.clone(),
        test_app_config().scheduler,
    )
}

#[tokio::test]
async fn test_pass_enqueues_due_query_and_advances_schedule() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;

    let before = Utc::now();
    scheduler(&ctx).run_pass().await.unwrap();

    // The job carries a full query snapshot.
    let claimed = ctx
        .queue
        .claim_one(Utc::now() + ChronoDuration::seconds(60))
        .await
        .unwrap()
        .expect("job enqueued");
    assert_eq!(claimed.id, format!("scrape:{}", query.id));
    assert_eq!(claimed.payload.query_id, query.id);
    assert_eq!(claimed.payload.source_name, "OLX.pl");
    assert_eq!(claimed.payload.keywords, vec!["audi", "a4"]);

    // next_run_at advanced within [interval - jitter, interval + jitter].
    let stored = ctx.store.get_query(&query.id).await.unwrap().unwrap();
    let next_run = stored.next_run_at.expect("next_run_at set");
    let interval = query.interval_secs;
    let jitter = query.jitter_secs();
    assert!(next_run > before);
    assert!(next_run >= before + ChronoDuration::seconds(interval - jitter));
    assert!(next_run <= Utc::now() + ChronoDuration::seconds(interval + jitter));

    // The scheduler does not touch last_run_at; that is run bookkeeping.
    assert!(stored.last_run_at.is_none());
}

#[tokio::test]
async fn test_advanced_query_is_not_reselected() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let sched = scheduler(&ctx);

    sched.run_pass().await.unwrap();
    let first = ctx
        .queue
        .claim_one(Utc::now() + ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert!(first.is_some());
    ctx.queue.complete(&first.unwrap().id).await.unwrap();

    // Immediately after, the query is scheduled in the future and a second
    // pass enqueues nothing.
    sched.run_pass().await.unwrap();
    let second = ctx
        .queue
        .claim_one(Utc::now() + ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert!(second.is_none());

    let stored = ctx.store.get_query(&query.id).await.unwrap().unwrap();
    assert!(stored.next_run_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_inactive_query_is_never_enqueued() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;

    let mut query = adscout::models::MonitoredQuery::new(adscout::models::NewMonitoredQuery {
        user_id: "user-1".to_string(),
        source_id: source.id.clone(),
        keywords: vec!["audi".to_string()],
        price_min: None,
        price_max: None,
        location: None,
        interval_secs: Some(600),
        jitter_pct: Some(0.2),
    });
    query.is_active = false;
    ctx.store.insert_query(&query).await.unwrap();

    scheduler(&ctx).run_pass().await.unwrap();
    let claimed = ctx
        .queue
        .claim_one(Utc::now() + ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn test_force_run_bypasses_due_check_with_priority() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let sched = scheduler(&ctx);

    // Make the query not due.
    ctx.store
        .advance_schedule(&query.id, Utc::now() + ChronoDuration::hours(1))
        .await
        .unwrap();
    let not_due = ctx.store.get_query(&query.id).await.unwrap().unwrap();

    sched.run_pass().await.unwrap();
    sched.force_run(&not_due).await.unwrap();

    let claimed = ctx
        .queue
        .claim_one(Utc::now() + ChronoDuration::seconds(60))
        .await
        .unwrap()
        .expect("manual job enqueued");
    assert!(claimed.id.starts_with(&format!("manual:{}", query.id)));

    // The natural cadence was not disturbed.
    let stored = ctx.store.get_query(&query.id).await.unwrap().unwrap();
    assert_eq!(stored.next_run_at, not_due.next_run_at);
}

#[tokio::test]
async fn test_repeated_force_runs_do_not_dedupe() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;
    let sched = scheduler(&ctx);

    sched.force_run(&query).await.unwrap();
    sched.force_run(&query).await.unwrap();

    let later = Utc::now() + ChronoDuration::seconds(60);
    assert!(ctx.queue.claim_one(later).await.unwrap().is_some());
    assert!(ctx.queue.claim_one(later).await.unwrap().is_some());
}

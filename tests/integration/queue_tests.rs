// Consumer-loop behavior of the durable queue with a fake job handler.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adscout::queue::{EnqueueOptions, JobHandler, PRIORITY_NORMAL};
use adscout::models::ScrapeJob;
use adscout::{AppError, Result};

use super::*;

struct CountingHandler {
    handled: AtomicU32,
    fail: bool,
}

impl CountingHandler {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            handled: AtomicU32::new(0),
            fail,
        })
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, _job: &ScrapeJob) -> Result<u32> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(AppError::Scraping("no containers matched".to_string()))
        } else {
            Ok(2)
        }
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_consumers_run_enqueued_jobs() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;

    let handler = CountingHandler::new(false);
    ctx.queue.process(handler.clone() as Arc<dyn JobHandler>).await;

    ctx.queue
        .enqueue(
            &sample_job(&query, &source),
            EnqueueOptions {
                id: format!("scrape:{}", query.id),
                delay_ms: 0,
                priority: PRIORITY_NORMAL,
            },
        )
        .await
        .unwrap();

    let done = wait_until(
        || handler.handled.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "handler never saw the job");

    ctx.queue.shutdown().await;

    // Removal-on-complete: the id is free again.
    assert!(ctx
        .queue
        .enqueue(
            &sample_job(&query, &source),
            EnqueueOptions {
                id: format!("scrape:{}", query.id),
                delay_ms: 0,
                priority: PRIORITY_NORMAL,
            },
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn test_failing_job_is_retried_then_dead_lettered() {
    let ctx = create_test_context().await;
    let source = seed_source(&ctx.store, "OLX.pl").await;
    let query = seed_query(&ctx.store, &source.id).await;

    let handler = CountingHandler::new(true);
    ctx.queue.process(handler.clone() as Arc<dyn JobHandler>).await;

    ctx.queue
        .enqueue(
            &sample_job(&query, &source),
            EnqueueOptions {
                id: "scrape:doomed".to_string(),
                delay_ms: 0,
                priority: PRIORITY_NORMAL,
            },
        )
        .await
        .unwrap();

    // max_attempts is 2 in the test config; both attempts must happen, then
    // the job must land in the dead letter state instead of looping forever.
    let exhausted = wait_until(
        || handler.handled.load(Ordering::SeqCst) >= 2,
        Duration::from_secs(5),
    )
    .await;
    assert!(exhausted, "job was not retried to exhaustion");

    let dead = wait_until_dead(&ctx).await;
    assert_eq!(dead, vec!["scrape:doomed".to_string()]);
    assert_eq!(handler.handled.load(Ordering::SeqCst), 2);

    ctx.queue.shutdown().await;
}

async fn wait_until_dead(ctx: &TestContext) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let dead = ctx.queue.dead_jobs().await.unwrap();
        if !dead.is_empty() || tokio::time::Instant::now() >= deadline {
            return dead;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

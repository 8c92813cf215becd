//! Timer-driven scheduling loop.
//!
//! Every tick selects a bounded batch of due monitored queries, enqueues a
//! scrape job for each with a small randomized delay, and immediately pushes
//! `next_run_at` forward with jitter so a query is never selected twice for
//! the same due window. The loop only decides *when*; the queue and worker
//! do the scraping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::models::{generate_id, MonitoredQuery, ScrapeJob};
use crate::queue::{EnqueueOptions, JobQueue, PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::store::Store;
use crate::utils::error::{AppError, Result};

/// Next run time: `now + interval ± jitter`, strictly in the future.
///
/// The same policy is used by the scheduler's advance-on-selection and the
/// worker's post-run bookkeeping so intervals stay bounded either way.
pub fn jittered_next_run(
    now: DateTime<Utc>,
    interval_secs: i64,
    jitter_secs: i64,
) -> DateTime<Utc> {
    let interval = interval_secs.max(1);
    // Keep the lower bound above `now` even for aggressive jitter settings.
    let bound = jitter_secs.clamp(0, interval - 1);
    let offset = if bound == 0 {
        0
    } else {
        rand::thread_rng().gen_range(-bound..=bound)
    };
    now + ChronoDuration::seconds(interval + offset)
}

pub struct QueryScheduler {
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    config: SchedulerConfig,
}

impl QueryScheduler {
    pub fn new(store: Arc<Store>, queue: Arc<JobQueue>, config: SchedulerConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Tick loop. A failed pass is logged and swallowed; the next tick
    /// retries independently and the loop itself never exits on error.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_secs = self.config.tick_secs, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "Scheduling pass failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// One scheduling pass over the due queries.
    pub async fn run_pass(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.store.due_queries(now, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "Selected due queries");

        for query in due {
            let Some(source) = self.store.get_source(&query.source_id).await? else {
                warn!(query = %query.id, source = %query.source_id, "Query references missing source");
                continue;
            };

            // Enqueue with a randomized initial delay so queries that became
            // due on the same tick do not hit the target site together.
            let job = ScrapeJob::from_query(&query, &source);
            let delay_ms = rand::thread_rng().gen_range(0..=self.config.enqueue_delay_max_ms);
            let enqueued = self
                .queue
                .enqueue(
                    &job,
                    EnqueueOptions {
                        id: format!("scrape:{}", query.id),
                        delay_ms,
                        priority: PRIORITY_NORMAL,
                    },
                )
                .await;
            if let Err(e) = enqueued {
                // Fire-and-forget: the schedule still advances below so the
                // query is not re-selected every tick while the queue is sick.
                warn!(query = %query.id, error = %e, "Failed to enqueue scrape job");
            }

            let next_run = jittered_next_run(now, query.interval_secs, query.jitter_secs());
            self.store.advance_schedule(&query.id, next_run).await?;
        }

        Ok(())
    }

    /// Manual run: bypasses the due-check and enqueues with elevated
    /// priority without disturbing the natural cadence.
    pub async fn force_run(&self, query: &MonitoredQuery) -> Result<()> {
        let source = self
            .store
            .get_source(&query.source_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("source {} not found", query.source_id))
            })?;

        let job = ScrapeJob::from_query(query, &source);
        self.queue
            .enqueue(
                &job,
                EnqueueOptions {
                    id: format!("manual:{}:{}", query.id, generate_id()),
                    delay_ms: 0,
                    priority: PRIORITY_HIGH,
                },
            )
            .await?;

        info!(query = %query.id, "Enqueued manual run");
        Ok(())
    }
}

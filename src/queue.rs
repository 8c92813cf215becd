//! Durable job queue over SQLite.
//!
//! Jobs are rows: a JSON payload snapshot plus priority, state, attempt and
//! scheduling columns. Enqueue is insert-or-ignore on the caller-supplied id,
//! claims are atomic `UPDATE .. RETURNING`, completion deletes the row, and
//! failure re-queues with exponential backoff until the attempt budget is
//! spent, after which the row is retained as a dead letter for inspection.
//! Rows left in the active state by a crashed process are re-queued at
//! startup once they are older than the stall timeout.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::models::ScrapeJob;
use crate::utils::error::Result;

pub const PRIORITY_NORMAL: i64 = 0;
pub const PRIORITY_HIGH: i64 = 10;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS scrape_jobs (
        id TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        run_at TEXT NOT NULL,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scrape_jobs_claim ON scrape_jobs(state, run_at, priority)",
];

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Stable id; enqueueing an id that is already queued is a no-op.
    pub id: String,
    pub delay_ms: u64,
    pub priority: i64,
}

#[derive(Debug)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: ScrapeJob,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Consumer side of the queue. The handler returns the number of new
/// listings on success; any error lets the queue's retry policy resubmit.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &ScrapeJob) -> Result<u32>;
}

pub struct JobQueue {
    pool: SqlitePool,
    config: QueueConfig,
    shutdown_tx: watch::Sender<bool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pool,
            config,
            shutdown_tx,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.recover_orphans().await?;
        Ok(())
    }

    /// Re-queue jobs orphaned in the active state by a crashed process.
    ///
    /// A claimed row only leaves 'active' through this process's own
    /// `complete`/`fail`, so an active row untouched for longer than the
    /// stall timeout belongs to a worker that no longer exists. Without this
    /// pass such rows would be stuck forever and the job silently lost.
    pub async fn recover_orphans(&self) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(self.config.stall_timeout_secs as i64);

        let result = sqlx::query(
            "UPDATE scrape_jobs SET state = 'queued', updated_at = ? WHERE state = 'active' AND updated_at < ?",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "Re-queued jobs orphaned by a previous run");
        }
        Ok(recovered)
    }

    /// Enqueue a job. Returns false when a job with the same id is already
    /// queued (per-query dedupe).
    pub async fn enqueue(&self, job: &ScrapeJob, opts: EnqueueOptions) -> Result<bool> {
        let now = Utc::now();
        let run_at = now + ChronoDuration::milliseconds(opts.delay_ms as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, payload, priority, state, attempts, max_attempts, run_at, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&opts.id)
        .bind(serde_json::to_string(job)?)
        .bind(opts.priority)
        .bind(self.config.max_attempts)
        .bind(run_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            debug!(job = %opts.id, delay_ms = opts.delay_ms, priority = opts.priority, "Enqueued job");
        } else {
            debug!(job = %opts.id, "Job already queued, skipping");
        }
        Ok(inserted)
    }

    /// Atomically claim the next runnable job, highest priority first.
    pub async fn claim_one(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET state = 'active', attempts = attempts + 1, updated_at = ?1
            WHERE id = (
                SELECT id FROM scrape_jobs
                WHERE state = 'queued' AND run_at <= ?1
                ORDER BY priority DESC, run_at ASC
                LIMIT 1
            )
            RETURNING id, payload, attempts, max_attempts
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_json: String = row.try_get("payload")?;
        let payload: ScrapeJob = serde_json::from_str(&payload_json)?;

        Ok(Some(ClaimedJob {
            id: row.try_get("id")?,
            payload,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        }))
    }

    /// Removal-on-complete retention: a finished job leaves no row behind.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scrape_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-queue a failed job with exponential backoff, or dead-letter it once
    /// the attempt budget is spent.
    pub async fn fail(&self, job: &ClaimedJob, error: &str) -> Result<()> {
        let now = Utc::now();

        if job.attempts >= job.max_attempts {
            sqlx::query(
                "UPDATE scrape_jobs SET state = 'dead', last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
            metrics::counter!("adscout_jobs_dead_lettered_total").increment(1);
            warn!(job = %job.id, attempts = job.attempts, error, "Job dead-lettered");
            return Ok(());
        }

        let backoff_ms = self.config.backoff_base_ms * 2u64.pow(job.attempts - 1);
        let run_at = now + ChronoDuration::milliseconds(backoff_ms as i64);

        sqlx::query(
            "UPDATE scrape_jobs SET state = 'queued', run_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(run_at)
        .bind(error)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        debug!(job = %job.id, attempts = job.attempts, backoff_ms, "Job re-queued after failure");
        Ok(())
    }

    /// Dead-lettered job ids, the operator signal that a source's extraction
    /// rules need maintenance.
    pub async fn dead_jobs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM scrape_jobs WHERE state = 'dead' ORDER BY updated_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(Into::into))
            .collect()
    }

    /// Spawn the consumer loops. Each loop claims one job at a time and runs
    /// it under the stall timeout; a stalled or failed job goes back through
    /// [`JobQueue::fail`].
    pub async fn process(self: &Arc<Self>, handler: Arc<dyn JobHandler>) {
        let mut consumers = self.consumers.lock().await;
        for consumer_id in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let shutdown_rx = self.shutdown_tx.subscribe();
            consumers.push(tokio::spawn(async move {
                queue.consumer_loop(consumer_id, handler, shutdown_rx).await;
            }));
        }
        info!(concurrency = self.config.concurrency, "Job queue consumers started");
    }

    async fn consumer_loop(
        &self,
        consumer_id: usize,
        handler: Arc<dyn JobHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let stall_timeout = Duration::from_secs(self.config.stall_timeout_secs);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let claimed = match self.claim_one(Utc::now()).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(consumer = consumer_id, error = %e, "Failed to claim job");
                    None
                }
            };

            match claimed {
                Some(job) => {
                    debug!(consumer = consumer_id, job = %job.id, attempt = job.attempts, "Running job");
                    let outcome = tokio::time::timeout(stall_timeout, handler.handle(&job.payload)).await;
                    match outcome {
                        Ok(Ok(new_listings)) => {
                            metrics::counter!("adscout_jobs_processed_total").increment(1);
                            info!(job = %job.id, new_listings, "Job completed");
                            if let Err(e) = self.complete(&job.id).await {
                                error!(job = %job.id, error = %e, "Failed to remove completed job");
                            }
                        }
                        Ok(Err(e)) => {
                            metrics::counter!("adscout_jobs_failed_total").increment(1);
                            warn!(job = %job.id, error = %e, "Job failed");
                            if let Err(e) = self.fail(&job, &e.to_string()).await {
                                error!(job = %job.id, error = %e, "Failed to re-queue job");
                            }
                        }
                        Err(_) => {
                            metrics::counter!("adscout_jobs_failed_total").increment(1);
                            let message =
                                format!("job stalled after {}s", stall_timeout.as_secs());
                            warn!(job = %job.id, "{}", message);
                            if let Err(e) = self.fail(&job, &message).await {
                                error!(job = %job.id, error = %e, "Failed to re-queue stalled job");
                            }
                        }
                    }
                }
                None => {
                    // Nothing runnable; sleep until the next poll or shutdown.
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        debug!(consumer = consumer_id, "Queue consumer stopped");
    }

    /// Stop consumer loops. In-flight jobs finish their current attempt (or
    /// hit the stall timeout) before their loop exits.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut consumers = self.consumers.lock().await;
        for handle in consumers.drain(..) {
            let _ = handle.await;
        }
        info!("Job queue shut down");
    }
}

// Shared helpers for integration tests: an in-memory store, a recording
// notifier, and a worker wired together without any live browser.

pub mod queue_tests;
pub mod reconciliation_tests;
pub mod scheduler_tests;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adscout::browser::SessionPool;
use adscout::config::{
    AppConfig, BrowserConfig, DatabaseConfig, ExtractionConfig, MetricsConfig,
    NotificationsConfig, QueueConfig, SchedulerConfig,
};
use adscout::models::{MonitoredQuery, NewMonitoredQuery, NewSource, ScrapeJob, Source};
use adscout::notify::{ChangeEvent, Notifier};
use adscout::queue::JobQueue;
use adscout::store::Store;
use adscout::worker::ScrapeWorker;
use adscout::Result;

/// Notifier that records every event it is handed.
pub struct RecordingNotifier {
    pub events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn test_app_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: 5,
        },
        browser: BrowserConfig {
            headless: true,
            pool_size: 2,
            idle_timeout_secs: 300,
            navigation_timeout_secs: 10,
            acquire_retry_ms: 50,
            chrome_path: None,
            screenshot_dir: "data/screenshots".to_string(),
        },
        scheduler: SchedulerConfig {
            tick_secs: 1,
            batch_size: 10,
            default_interval_secs: 600,
            jitter_pct: 0.2,
            enqueue_delay_max_ms: 0,
        },
        queue: QueueConfig {
            concurrency: 1,
            max_attempts: 2,
            backoff_base_ms: 10,
            poll_interval_ms: 10,
            stall_timeout_secs: 5,
        },
        extraction: ExtractionConfig {
            max_cards_per_page: 50,
            spam_patterns: vec!["(?i)replica".to_string()],
        },
        notifications: NotificationsConfig { webhook_url: None },
        metrics: MetricsConfig {
            enabled: false,
            port: 0,
        },
    }
}

pub struct TestContext {
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub worker: Arc<ScrapeWorker>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn create_test_context() -> TestContext {
    let config = test_app_config();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    let store = Arc::new(Store::new(pool.clone()));
    store.migrate().await.expect("store migration");

    let queue = Arc::new(JobQueue::new(pool, config.queue.clone()));
    queue.migrate().await.expect("queue migration");

    let sessions = Arc::new(SessionPool::new(config.browser.clone()));
    let notifier = RecordingNotifier::new();
    let worker = Arc::new(ScrapeWorker::new(
        sessions,
        Arc::clone(&store),
        notifier.clone() as Arc<dyn Notifier>,
        &config,
    ));

    TestContext {
        store,
        queue,
        worker,
        notifier,
    }
}

pub async fn seed_source(store: &Store, name: &str) -> Source {
    let source = Source::new(NewSource {
        name: name.to_string(),
        base_url: "https://www.olx.pl".to_string(),
        default_params: None,
    });
    store.insert_source(&source).await.expect("insert source");
    source
}

pub async fn seed_query(store: &Store, source_id: &str) -> MonitoredQuery {
    let query = MonitoredQuery::new(NewMonitoredQuery {
        user_id: "user-1".to_string(),
        source_id: source_id.to_string(),
        keywords: vec!["audi".to_string(), "a4".to_string()],
        price_min: Some(Decimal::from_str("10000").unwrap()),
        price_max: Some(Decimal::from_str("60000").unwrap()),
        location: Some("Warszawa".to_string()),
        interval_secs: Some(600),
        jitter_pct: Some(0.2),
    });
    store.insert_query(&query).await.expect("insert query");
    query
}

pub fn sample_job(query: &MonitoredQuery, source: &Source) -> ScrapeJob {
    ScrapeJob::from_query(query, source)
}

/// Let spawned fire-and-forget notification tasks settle before asserting.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

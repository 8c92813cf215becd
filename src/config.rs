use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub browser: BrowserConfig,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub extraction: ExtractionConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub pool_size: usize,
    pub idle_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    pub acquire_retry_ms: u64,
    pub chrome_path: Option<String>,
    pub screenshot_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub batch_size: i64,
    pub default_interval_secs: i64,
    /// Signed jitter applied around the nominal interval, as a fraction of it.
    pub jitter_pct: f64,
    /// Upper bound of the randomized enqueue delay that desynchronizes
    /// queries becoming due on the same tick.
    pub enqueue_delay_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub poll_interval_ms: u64,
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub max_cards_per_page: usize,
    pub spam_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "ADSCOUT_"
            .add_source(Environment::with_prefix("ADSCOUT").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate database configuration
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "Database min_connections cannot exceed max_connections".into(),
            ));
        }

        // Validate browser configuration
        if self.browser.pool_size == 0 {
            return Err(ConfigError::Message(
                "Browser pool_size must be greater than 0".into(),
            ));
        }

        if self.browser.idle_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Browser idle_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.browser.acquire_retry_ms == 0 {
            return Err(ConfigError::Message(
                "Browser acquire_retry_ms must be greater than 0".into(),
            ));
        }

        // Validate scheduler configuration
        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::Message(
                "Scheduler tick_secs must be greater than 0".into(),
            ));
        }

        if self.scheduler.batch_size <= 0 {
            return Err(ConfigError::Message(
                "Scheduler batch_size must be greater than 0".into(),
            ));
        }

        if self.scheduler.default_interval_secs <= 0 {
            return Err(ConfigError::Message(
                "Scheduler default_interval_secs must be greater than 0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.scheduler.jitter_pct) {
            return Err(ConfigError::Message(
                "Scheduler jitter_pct must be in [0, 1)".into(),
            ));
        }

        // Validate queue configuration
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Message(
                "Queue concurrency must be greater than 0".into(),
            ));
        }

        if self.queue.concurrency > self.browser.pool_size {
            return Err(ConfigError::Message(
                "Queue concurrency cannot exceed browser pool_size".into(),
            ));
        }

        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Message(
                "Queue max_attempts must be greater than 0".into(),
            ));
        }

        if self.queue.stall_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Queue stall_timeout_secs must be greater than 0".into(),
            ));
        }

        // Validate extraction configuration
        if self.extraction.max_cards_per_page == 0 {
            return Err(ConfigError::Message(
                "Extraction max_cards_per_page must be greater than 0".into(),
            ));
        }

        // Validate metrics configuration
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message(
                "Metrics port must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Browser launch error: {0}")]
    BrowserLaunch(String),

    #[error("Session pool is saturated")]
    PoolSaturated,

    #[error("Session pool has been shut down")]
    PoolShutdown,

    #[error("Listing with the same primary hash already exists")]
    DuplicateListing,

    #[error("Workflow '{workflow}' failed at step {step}: {message}")]
    Workflow {
        workflow: String,
        step: u32,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

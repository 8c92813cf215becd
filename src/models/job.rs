use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{MonitoredQuery, Source};

/// Snapshot of a monitored query at enqueue time. Jobs carry everything the
/// worker needs so a query edited or deleted mid-flight cannot change a run
/// that was already scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeJob {
    pub query_id: String,
    pub user_id: String,
    pub source_id: String,
    pub source_name: String,
    pub base_url: String,
    pub keywords: Vec<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub location: Option<String>,
    pub interval_secs: i64,
    pub jitter_pct: f64,
}

impl ScrapeJob {
    pub fn from_query(query: &MonitoredQuery, source: &Source) -> Self {
        Self {
            query_id: query.id.clone(),
            user_id: query.user_id.clone(),
            source_id: query.source_id.clone(),
            source_name: source.name.clone(),
            base_url: source.base_url.clone(),
            keywords: query.keywords.clone(),
            price_min: query.price_min,
            price_max: query.price_max,
            location: query.location.clone(),
            interval_secs: query.interval_secs,
            jitter_pct: query.jitter_pct,
        }
    }
}

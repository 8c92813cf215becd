use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::models::{decimal_column, generate_id, string_list_column};

/// A user-owned watch definition: what to search for on which marketplace,
/// and how often. The scheduler advances `next_run_at`/`last_run_at`; the
/// owning user mutates the rest through surfaces outside this core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredQuery {
    pub id: String,
    pub user_id: String,
    pub source_id: String,

    // Search definition
    pub keywords: Vec<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub location: Option<String>,

    // Schedule
    pub interval_secs: i64,
    pub jitter_pct: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,

    // Status
    pub is_active: bool,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMonitoredQuery {
    pub user_id: String,
    pub source_id: String,
    pub keywords: Vec<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub location: Option<String>,
    pub interval_secs: Option<i64>,
    pub jitter_pct: Option<f64>,
}

impl MonitoredQuery {
    pub fn new(new_query: NewMonitoredQuery) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            user_id: new_query.user_id,
            source_id: new_query.source_id,
            keywords: new_query.keywords,
            price_min: new_query.price_min,
            price_max: new_query.price_max,
            location: new_query.location,
            interval_secs: new_query.interval_secs.unwrap_or(900),
            jitter_pct: new_query.jitter_pct.unwrap_or(0.2),
            last_run_at: None,
            next_run_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// A query is due when it is active and its next scheduled run is unset
    /// or in the past. Never-run queries are due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }

        match self.next_run_at {
            Some(next_run_at) => next_run_at <= now,
            None => true,
        }
    }

    /// Absolute jitter bound in seconds derived from the interval.
    pub fn jitter_secs(&self) -> i64 {
        (self.interval_secs as f64 * self.jitter_pct) as i64
    }
}

impl<'r> FromRow<'r, SqliteRow> for MonitoredQuery {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            source_id: row.try_get("source_id")?,
            keywords: string_list_column(row, "keywords")?,
            price_min: decimal_column(row, "price_min")?,
            price_max: decimal_column(row, "price_max")?,
            location: row.try_get("location")?,
            interval_secs: row.try_get("interval_secs")?,
            jitter_pct: row.try_get("jitter_pct")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

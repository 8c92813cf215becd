//! Persistence boundary for the scraping core: monitored queries and sources
//! are read (and their schedule columns advanced), listings are upserted
//! keyed by primary hash. Schema creation is idempotent; the uniqueness
//! index on `listings.primary_hash` is what makes insert-if-absent safe
//! under concurrent jobs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;

use crate::models::{Listing, MonitoredQuery, Source};
use crate::utils::error::{AppError, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        base_url TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        default_params TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS monitored_queries (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        source_id TEXT NOT NULL REFERENCES sources(id),
        keywords TEXT NOT NULL,
        price_min TEXT,
        price_max TEXT,
        location TEXT,
        interval_secs INTEGER NOT NULL,
        jitter_pct REAL NOT NULL,
        last_run_at TEXT,
        next_run_at TEXT,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_queries_due ON monitored_queries(is_active, next_run_at)",
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        external_id TEXT NOT NULL,
        title TEXT NOT NULL,
        price TEXT,
        currency TEXT NOT NULL,
        location TEXT,
        phone TEXT,
        url TEXT NOT NULL,
        image_urls TEXT NOT NULL,
        primary_hash TEXT NOT NULL,
        semantic_hash TEXT NOT NULL,
        previous_price TEXT,
        is_spam BOOLEAN NOT NULL DEFAULT 0,
        first_seen_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_listings_primary_hash ON listings(primary_hash)",
];

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Active queries of active sources that are due at `now`, oldest first,
    /// bounded to keep a single scheduling pass cheap.
    pub async fn due_queries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MonitoredQuery>> {
        let queries = sqlx::query_as::<_, MonitoredQuery>(
            r#"
            SELECT q.* FROM monitored_queries q
            JOIN sources s ON s.id = q.source_id
            WHERE q.is_active = 1
              AND s.is_active = 1
              AND (q.next_run_at IS NULL OR q.next_run_at <= ?)
            ORDER BY q.next_run_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(queries)
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    pub async fn get_query(&self, id: &str) -> Result<Option<MonitoredQuery>> {
        let query =
            sqlx::query_as::<_, MonitoredQuery>("SELECT * FROM monitored_queries WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(query)
    }

    /// Move a query's next run forward. Called by the scheduler right after
    /// selection so the query cannot be picked twice in one tick.
    pub async fn advance_schedule(&self, query_id: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE monitored_queries SET next_run_at = ?, updated_at = ? WHERE id = ?")
            .bind(next_run_at)
            .bind(Utc::now())
            .bind(query_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a completed run's bookkeeping.
    pub async fn record_run(
        &self,
        query_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE monitored_queries SET last_run_at = ?, next_run_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(query_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_listing_by_primary_hash(&self, hash: &str) -> Result<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE primary_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(listing)
    }

    /// Insert a listing. A uniqueness violation on the primary hash maps to
    /// [`AppError::DuplicateListing`] so callers can fall back to the update
    /// path instead of failing the job.
    pub async fn insert_listing(&self, listing: &Listing) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings (
                id, source_id, external_id, title, price, currency, location,
                phone, url, image_urls, primary_hash, semantic_hash,
                previous_price, is_spam, first_seen_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.source_id)
        .bind(&listing.external_id)
        .bind(&listing.title)
        .bind(listing.price.as_ref().map(|p| p.to_string()))
        .bind(&listing.currency)
        .bind(&listing.location)
        .bind(&listing.phone)
        .bind(&listing.url)
        .bind(serde_json::to_string(&listing.image_urls)?)
        .bind(&listing.primary_hash)
        .bind(&listing.semantic_hash)
        .bind(listing.previous_price.as_ref().map(|p| p.to_string()))
        .bind(listing.is_spam)
        .bind(listing.first_seen_at)
        .bind(listing.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::DuplicateListing)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lower a listing's price in place, retaining the prior price.
    pub async fn apply_price_drop(
        &self,
        listing_id: &str,
        new_price: &Decimal,
        previous_price: &Decimal,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE listings SET price = ?, previous_price = ?, updated_at = ? WHERE id = ?",
        )
        .bind(new_price.to_string())
        .bind(previous_price.to_string())
        .bind(Utc::now())
        .bind(listing_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Sources and queries are authored by collaborators outside this core;
    // these writers exist for them and for tests.

    pub async fn insert_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, base_url, is_active, default_params, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.base_url)
        .bind(source.is_active)
        .bind(&source.default_params)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_query(&self, query: &MonitoredQuery) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_queries (
                id, user_id, source_id, keywords, price_min, price_max,
                location, interval_secs, jitter_pct, last_run_at, next_run_at,
                is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query.id)
        .bind(&query.user_id)
        .bind(&query.source_id)
        .bind(serde_json::to_string(&query.keywords)?)
        .bind(query.price_min.as_ref().map(|p| p.to_string()))
        .bind(query.price_max.as_ref().map(|p| p.to_string()))
        .bind(&query.location)
        .bind(query.interval_secs)
        .bind(query.jitter_pct)
        .bind(query.last_run_at)
        .bind(query.next_run_at)
        .bind(query.is_active)
        .bind(query.created_at)
        .bind(query.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

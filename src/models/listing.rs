use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::models::{decimal_column, generate_id, string_list_column};

/// A discovered classified ad. Created once per unique primary hash, updated
/// in place on price decrease, never duplicated. Written exclusively by the
/// job worker's reconciliation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: String,
    pub source_id: String,
    /// Id assigned by the source site.
    pub external_id: String,

    pub title: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub url: String,
    pub image_urls: Vec<String>,

    // Dedup fingerprints
    pub primary_hash: String,
    pub semantic_hash: String,

    // Change tracking
    pub previous_price: Option<Decimal>,
    pub is_spam: bool,

    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub url: String,
    pub image_urls: Vec<String>,
    pub primary_hash: String,
    pub semantic_hash: String,
    pub is_spam: bool,
}

impl Listing {
    pub fn new(new_listing: NewListing) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            source_id: new_listing.source_id,
            external_id: new_listing.external_id,
            title: new_listing.title,
            price: new_listing.price,
            currency: new_listing.currency,
            location: new_listing.location,
            phone: new_listing.phone,
            url: new_listing.url,
            image_urls: new_listing.image_urls,
            primary_hash: new_listing.primary_hash,
            semantic_hash: new_listing.semantic_hash,
            previous_price: None,
            is_spam: new_listing.is_spam,
            first_seen_at: now,
            updated_at: now,
        }
    }

    /// A price drop is only recognized when both prices are present and the
    /// new one is strictly lower.
    pub fn is_price_drop(&self, new_price: Option<&Decimal>) -> bool {
        match (&self.price, new_price) {
            (Some(old), Some(new)) => new < old,
            _ => false,
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for Listing {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            price: decimal_column(row, "price")?,
            currency: row.try_get("currency")?,
            location: row.try_get("location")?,
            phone: row.try_get("phone")?,
            url: row.try_get("url")?,
            image_urls: string_list_column(row, "image_urls")?,
            primary_hash: row.try_get("primary_hash")?,
            semantic_hash: row.try_get("semantic_hash")?,
            previous_price: decimal_column(row, "previous_price")?,
            is_spam: row.try_get("is_spam")?,
            first_seen_at: row.try_get("first_seen_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

pub mod job;
pub mod listing;
pub mod monitored_query;
pub mod source;

// Re-exports for convenience
pub use job::*;
pub use listing::*;
pub use monitored_query::*;
pub use source::*;

/// Kind of change detected during reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT")]
pub enum ChangeKind {
    #[sqlx(rename = "new_listing")]
    NewListing,
    #[sqlx(rename = "price_drop")]
    PriceDrop,
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Decode a nullable TEXT column holding a decimal price.
pub(crate) fn decimal_column(
    row: &SqliteRow,
    index: &'static str,
) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(index)?;
    raw.map(|value| {
        Decimal::from_str(&value).map_err(|e| sqlx::Error::ColumnDecode {
            index: index.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

/// Decode a TEXT column holding a JSON array of strings.
pub(crate) fn string_list_column(
    row: &SqliteRow,
    index: &'static str,
) -> Result<Vec<String>, sqlx::Error> {
    let raw: String = row.try_get(index)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: index.to_string(),
        source: Box::new(e),
    })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// A target marketplace. Read-only to the scraping core; rows are maintained
/// by operators through surfaces outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub is_active: bool,
    /// Optional JSON bag of default extraction parameters for this source.
    pub default_params: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub base_url: String,
    pub default_params: Option<String>,
}

impl Source {
    pub fn new(new_source: NewSource) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: new_source.name,
            base_url: new_source.base_url,
            is_active: true,
            default_params: new_source.default_params,
            created_at: now,
            updated_at: now,
        }
    }
}

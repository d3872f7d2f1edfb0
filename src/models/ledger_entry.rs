//! Ledger entry documents.

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Version;
use crate::store::to_json;

/// One applied migration, as stored in the `migrations` collection:
/// `{ version: int, ctime: date }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: Version,
    /// When the migration finished and was recorded.
    #[serde(rename = "ctime", with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// `created_at` is truncated to milliseconds, the precision of a BSON
    /// date, so the entry equals what a later read returns.
    pub fn new(version: Version, created_at: DateTime<Utc>) -> Self {
        Self {
            version,
            created_at: mongodb::bson::DateTime::from_chrono(created_at).to_chrono(),
        }
    }

    /// Relaxed extended JSON rendering, used in skip notices.
    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(to_json(&mongodb::bson::to_document(self)?))
    }
}

//! Execution claims held while a migration body runs.

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::models::Version;

/// Marker stored in `migration_locks` while one process runs a version.
/// Keyed by `_id`, so the server allows a single claim per version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "_id")]
    pub version: Version,
    /// `host:pid` of the claiming process.
    pub holder: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub claimed_at: DateTime<Utc>,
}

//! Application error types.

use thiserror::Error;

/// Application-level errors for docmigrate.
#[derive(Error, Debug)]
pub enum AppError {
    // Driver errors
    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("BSON serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    Deserialization(#[from] mongodb::bson::de::Error),

    // Store errors
    #[error("Duplicate key in '{collection}': {payload}")]
    DuplicateKey { collection: String, payload: String },

    #[error("Document failed validation in '{collection}': {payload}")]
    DocumentValidation { collection: String, payload: String },

    #[error("Index operation {operation} on '{collection}' failed: {payload}")]
    IndexOperation {
        operation: String,
        collection: String,
        payload: String,
    },

    // Ledger errors
    #[error("Ledger bootstrap failed during {operation}: {payload}")]
    Bootstrap { operation: String, payload: String },

    #[error("Migration {version} is already recorded or claimed by another run")]
    UniquenessViolation { version: i32 },

    #[error("Ledger collection 'migrations' does not exist; apply migration 1 before migration {version}")]
    LedgerNotInitialized { version: u32 },

    // Registry errors
    #[error("Invalid migration version {0}: must be between 1 and {max}", max = i32::MAX)]
    InvalidVersion(i64),

    #[error("Migration version {version} is registered twice ({first} and {second})")]
    DuplicateMigration {
        version: u32,
        first: &'static str,
        second: &'static str,
    },

    #[error("No migration registered with version {0}")]
    UnknownMigration(u32),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// True when the error means the version was already taken, either by a
    /// ledger entry or by a concurrent run's claim.
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, AppError::UniquenessViolation { .. })
    }
}

//! The migration ledger: which versions have run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};

use crate::error::AppError;
use crate::models::{LedgerEntry, Version};
use crate::store::{DocumentStore, IndexOptions, IndexSpec};

/// Collection holding one [`LedgerEntry`] per applied migration.
pub const LEDGER_COLLECTION: &str = "migrations";

/// Append-only record of applied migration versions.
///
/// The unique index on `version` is what guarantees a version is recorded
/// once; [`Ledger::lookup`] is only an early exit.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// `$jsonSchema` validator for ledger documents.
    pub fn validator() -> Document {
        doc! {
            "$jsonSchema": {
                "bsonType": "object",
                "required": ["version", "ctime"],
                "properties": {
                    "version": { "bsonType": "int", "minimum": 1 },
                    "ctime": { "bsonType": "date" },
                },
            },
        }
    }

    /// Creates the ledger collection with its validator and the unique
    /// index on `version`.
    ///
    /// Any rejected step is a [`AppError::Bootstrap`]. This runs as
    /// migration #1, so it executes once per database.
    pub async fn initialize(store: &dyn DocumentStore) -> Result<(), AppError> {
        store
            .create_collection(LEDGER_COLLECTION, Some(Self::validator()))
            .await?
            .into_result(|payload| AppError::Bootstrap {
                operation: format!("createCollection({})", LEDGER_COLLECTION),
                payload,
            })?;

        let index = IndexSpec::new(doc! { "version": 1 }).with_options(IndexOptions::unique());
        let name = index.resolved_name();
        store
            .create_index(LEDGER_COLLECTION, index)
            .await?
            .into_result(|payload| AppError::Bootstrap {
                operation: format!("createIndex({})", name),
                payload,
            })?;

        tracing::info!(collection = LEDGER_COLLECTION, "Ledger initialized");
        Ok(())
    }

    /// Whether the ledger collection has been created.
    pub async fn exists(&self) -> Result<bool, AppError> {
        Ok(self
            .store
            .describe_collection(LEDGER_COLLECTION)
            .await?
            .is_some())
    }

    /// Returns the entry recorded for `version`, if any.
    pub async fn lookup(&self, version: Version) -> Result<Option<LedgerEntry>, AppError> {
        let found = self
            .store
            .find_one(LEDGER_COLLECTION, doc! { "version": version })
            .await?;

        Ok(found.map(mongodb::bson::from_document).transpose()?)
    }

    /// Records `version` as applied at `created_at`.
    ///
    /// Fails with [`AppError::UniquenessViolation`] if the version is
    /// already recorded.
    pub async fn append(
        &self,
        version: Version,
        created_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, AppError> {
        let entry = LedgerEntry::new(version, created_at);
        let document = mongodb::bson::to_document(&entry)?;

        match self.store.insert_one(LEDGER_COLLECTION, document).await {
            Ok(()) => Ok(entry),
            Err(AppError::DuplicateKey { payload, .. }) => {
                tracing::error!(version = version.get(), %payload, "Ledger already holds version");
                Err(AppError::UniquenessViolation {
                    version: version.get(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// All entries in version order.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, AppError> {
        self.store
            .find(LEDGER_COLLECTION, doc! {}, Some(doc! { "version": 1 }))
            .await?
            .into_iter()
            .map(|document| mongodb::bson::from_document(document).map_err(AppError::from))
            .collect()
    }
}

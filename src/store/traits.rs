//! Core trait for document store access.

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::error::AppError;
use crate::store::{CommandOutcome, IndexSpec};

/// Collection metadata relevant to migrations.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// Validator document (e.g. `{ $jsonSchema: ... }`), if one is set.
    pub validator: Option<Document>,
}

/// Database handle used by migrations.
///
/// Schema commands (`create_collection`, `create_index`, `drop_index`) report
/// server-side rejections as a failed [`CommandOutcome`] so callers can decide
/// how to surface them. Transport and driver failures are returned as `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a collection, optionally with a validator.
    ///
    /// Fails (as an outcome) when the collection already exists.
    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
    ) -> Result<CommandOutcome, AppError>;

    /// Returns metadata for a collection, or `None` if it does not exist.
    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>, AppError>;

    /// Finds the first document matching `filter` (field equality).
    async fn find_one(&self, collection: &str, filter: Document)
        -> Result<Option<Document>, AppError>;

    /// Finds all documents matching `filter`, optionally sorted.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<Document>, AppError>;

    /// Inserts one document. Unique index violations surface as
    /// [`AppError::DuplicateKey`], validator rejections as
    /// [`AppError::DocumentValidation`].
    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), AppError>;

    /// Deletes the first document matching `filter`, returning the number deleted.
    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, AppError>;

    /// Creates an index. Creating an identical existing index succeeds.
    async fn create_index(&self, collection: &str, index: IndexSpec)
        -> Result<CommandOutcome, AppError>;

    /// Drops an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<CommandOutcome, AppError>;

    /// Lists the indexes of a collection (empty if the collection does not exist).
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, AppError>;
}

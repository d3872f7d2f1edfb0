//! Document store abstraction for migrations.
//!
//! Migrations, the ledger and the runner talk to the database through the
//! [`DocumentStore`] trait, so the same code runs against MongoDB in
//! production and against an in-process store in tests.
//!
//! # Architecture
//!
//! - [`DocumentStore`] - Collection, document and index operations
//! - [`CommandOutcome`] - Success flag plus the server's diagnostic payload
//!   for schema commands
//! - [`create_indexes`] / [`drop_indexes`] - Batch helpers that fail on the
//!   first non-success outcome
//!
//! # Usage
//!
//! ```ignore
//! use docmigrate::store::{create_indexes, IndexOptions};
//! use mongodb::bson::doc;
//!
//! create_indexes(store, "cats", &[doc! { "name": 1 }], IndexOptions::unique()).await?;
//! ```

mod index;
mod outcome;
mod traits;

pub mod backends;

pub use index::{create_indexes, default_index_name, drop_indexes, IndexOptions, IndexSpec};
pub use outcome::{codes, to_json, CommandOutcome};
pub use traits::{CollectionInfo, DocumentStore};

#[cfg(test)]
pub use traits::MockDocumentStore;

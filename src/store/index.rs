//! Index specifications and batch index helpers.

use mongodb::bson::{Bson, Document};

use crate::error::AppError;
use crate::store::DocumentStore;

/// Options applied to every index of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self {
            unique: true,
            ..Self::default()
        }
    }
}

/// An index: key pattern, optional explicit name, and options.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Document,
    pub name: Option<String>,
    pub options: IndexOptions,
}

impl IndexSpec {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            name: None,
            options: IndexOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit name, or the server's default name for the key pattern.
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| default_index_name(&self.keys))
    }
}

/// Name the server gives an index when none is specified:
/// `{ name: 1, age: -1 }` becomes `name_1_age_-1`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction_label(direction)))
        .collect::<Vec<_>>()
        .join("_")
}

fn direction_label(direction: &Bson) -> String {
    match direction {
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) if v.fract() == 0.0 => (*v as i64).to_string(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Creates one index per key pattern on `collection`, in order.
///
/// Stops at the first index the server rejects and returns
/// [`AppError::IndexOperation`] with the rejection payload. Returns the
/// names of the created indexes.
pub async fn create_indexes(
    store: &dyn DocumentStore,
    collection: &str,
    keys: &[Document],
    options: IndexOptions,
) -> Result<Vec<String>, AppError> {
    let mut created = Vec::with_capacity(keys.len());

    for key in keys {
        let index = IndexSpec::new(key.clone()).with_options(options);
        let name = index.resolved_name();

        store
            .create_index(collection, index)
            .await?
            .into_result(|payload| AppError::IndexOperation {
                operation: format!("createIndex({})", name),
                collection: collection.to_string(),
                payload,
            })?;

        tracing::debug!(collection, index = %name, "Created index");
        created.push(name);
    }

    Ok(created)
}

/// Drops the index for each key pattern on `collection`, in order.
///
/// Stops at the first drop the server rejects (e.g. unknown index) and
/// returns [`AppError::IndexOperation`] with the rejection payload.
pub async fn drop_indexes(
    store: &dyn DocumentStore,
    collection: &str,
    keys: &[Document],
) -> Result<Vec<String>, AppError> {
    let mut dropped = Vec::with_capacity(keys.len());

    for key in keys {
        let name = default_index_name(key);

        store
            .drop_index(collection, &name)
            .await?
            .into_result(|payload| AppError::IndexOperation {
                operation: format!("dropIndex({})", name),
                collection: collection.to_string(),
                payload,
            })?;

        tracing::debug!(collection, index = %name, "Dropped index");
        dropped.push(name);
    }

    Ok(dropped)
}

//! In-process document store.
//!
//! Mirrors the MongoDB behaviour migrations depend on: implicit collection
//! creation on insert and index creation, the `_id_` index, unique and sparse
//! indexes, `$jsonSchema` validators (`required`, `bsonType`, `minimum`,
//! `maximum`), and the server's error codes for rejected commands.
//!
//! Filters match on top-level field equality only.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};

use crate::error::AppError;
use crate::store::{
    codes, default_index_name, to_json, CollectionInfo, CommandOutcome, DocumentStore,
    IndexOptions, IndexSpec,
};

/// Name of the index every collection has on `_id`.
const ID_INDEX: &str = "_id_";

struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
    validator: Option<Document>,
}

impl MemoryCollection {
    fn new(validator: Option<Document>) -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexSpec::new(doc! { "_id": 1 })
                .named(ID_INDEX)
                .with_options(IndexOptions::unique())],
            validator,
        }
    }

    /// Returns the first stored document that collides with `document` on `index`.
    fn find_conflict<'a>(&'a self, index: &IndexSpec, document: &Document) -> Option<&'a Document> {
        let key = index_key(document, index)?;
        self.documents
            .iter()
            .find(|other| index_key(other, index).is_some_and(|k| keys_equal(&k, &key)))
    }
}

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(&self) -> MutexGuard<'_, BTreeMap<String, MemoryCollection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
    ) -> Result<CommandOutcome, AppError> {
        let mut collections = self.collections();
        if collections.contains_key(name) {
            return Ok(CommandOutcome::failure(
                codes::NAMESPACE_EXISTS,
                "NamespaceExists",
                format!("Collection {} already exists.", name),
            ));
        }

        collections.insert(name.to_string(), MemoryCollection::new(validator));
        Ok(CommandOutcome::success(Document::new()))
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>, AppError> {
        Ok(self.collections().get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            validator: c.validator.clone(),
        }))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, AppError> {
        Ok(self.collections().get(collection).and_then(|c| {
            c.documents
                .iter()
                .find(|document| matches_filter(document, &filter))
                .cloned()
        }))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<Document>, AppError> {
        let mut found: Vec<Document> = match self.collections().get(collection) {
            Some(c) => c
                .documents
                .iter()
                .filter(|document| matches_filter(document, &filter))
                .cloned()
                .collect(),
            None => return Ok(vec![]),
        };

        if let Some(sort) = sort {
            found.sort_by(|a, b| compare_documents(a, b, &sort));
        }
        Ok(found)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), AppError> {
        let mut document = document;
        if !document.contains_key("_id") {
            let mut with_id = doc! { "_id": ObjectId::new() };
            for (key, value) in document {
                with_id.insert(key, value);
            }
            document = with_id;
        }

        let mut collections = self.collections();
        let target = collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection::new(None));

        if let Some(validator) = &target.validator {
            if let Err(reason) = validate(&document, validator) {
                return Err(AppError::DocumentValidation {
                    collection: collection.to_string(),
                    payload: to_json(&doc! {
                        "code": codes::DOCUMENT_VALIDATION_FAILURE,
                        "codeName": "DocumentValidationFailure",
                        "errmsg": "Document failed validation",
                        "details": reason,
                    }),
                });
            }
        }

        for index in target.indexes.iter().filter(|i| i.options.unique) {
            if target.find_conflict(index, &document).is_some() {
                return Err(AppError::DuplicateKey {
                    collection: collection.to_string(),
                    payload: to_json(&duplicate_key_payload(collection, index, &document)),
                });
            }
        }

        target.documents.push(document);
        Ok(())
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        let mut collections = self.collections();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        match target
            .documents
            .iter()
            .position(|document| matches_filter(document, &filter))
        {
            Some(position) => {
                target.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn create_index(
        &self,
        collection: &str,
        index: IndexSpec,
    ) -> Result<CommandOutcome, AppError> {
        let mut collections = self.collections();
        let created_collection = !collections.contains_key(collection);
        let target = collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection::new(None));

        let name = index.resolved_name();
        let before = target.indexes.len() as i32;

        if let Some(existing) = target
            .indexes
            .iter()
            .find(|i| i.resolved_name() == name || i.keys == index.keys)
        {
            if existing.keys == index.keys && existing.options == index.options {
                return Ok(CommandOutcome::success(doc! {
                    "numIndexesBefore": before,
                    "numIndexesAfter": before,
                    "note": "all indexes already exist",
                }));
            }
            return Ok(CommandOutcome::failure(
                codes::INDEX_OPTIONS_CONFLICT,
                "IndexOptionsConflict",
                format!(
                    "An existing index has the same name or key pattern as the requested index: {}",
                    existing.resolved_name()
                ),
            ));
        }

        if index.options.unique {
            for (position, document) in target.documents.iter().enumerate() {
                let Some(key) = index_key(document, &index) else {
                    continue;
                };
                let duplicate = target.documents[..position]
                    .iter()
                    .any(|earlier| index_key(earlier, &index).is_some_and(|k| keys_equal(&k, &key)));
                if duplicate {
                    let payload = duplicate_key_payload(collection, &index, document);
                    return Ok(CommandOutcome::Failed(with_ok_zero(payload)));
                }
            }
        }

        target.indexes.push(index);
        Ok(CommandOutcome::success(doc! {
            "createdCollectionAutomatically": created_collection,
            "numIndexesBefore": before,
            "numIndexesAfter": before + 1,
        }))
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<CommandOutcome, AppError> {
        let mut collections = self.collections();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(CommandOutcome::failure(
                codes::NAMESPACE_NOT_FOUND,
                "NamespaceNotFound",
                format!("ns not found {}", collection),
            ));
        };

        if name == ID_INDEX {
            return Ok(CommandOutcome::failure(
                codes::INVALID_OPTIONS,
                "InvalidOptions",
                "cannot drop _id index",
            ));
        }

        let before = target.indexes.len() as i32;
        match target.indexes.iter().position(|i| i.resolved_name() == name) {
            Some(position) => {
                target.indexes.remove(position);
                Ok(CommandOutcome::success(doc! { "nIndexesWas": before }))
            }
            None => Ok(CommandOutcome::failure(
                codes::INDEX_NOT_FOUND,
                "IndexNotFound",
                format!("index not found with name [{}]", name),
            )),
        }
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, AppError> {
        Ok(self
            .collections()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }
}

// ----------------------------------------------------------------------------
// Matching and ordering
// ----------------------------------------------------------------------------

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality with numeric types compared by value, as the server does.
fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (as_number(a), as_number(b), a, b) {
            (Some(x), Some(y), _, _) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (_, _, Bson::String(x), Bson::String(y)) => x.cmp(y),
            (_, _, Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn compare_documents(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ordering = compare_values(a.get(field), b.get(field));
        let ordering = match as_number(direction) {
            Some(d) if d < 0.0 => ordering.reverse(),
            _ => ordering,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| values_equal(document.get(field).unwrap_or(&Bson::Null), expected))
}

/// Values of the index's key fields, `None` when a sparse index skips the document.
fn index_key(document: &Document, index: &IndexSpec) -> Option<Vec<Bson>> {
    let values: Vec<Option<&Bson>> = index.keys.keys().map(|field| document.get(field)).collect();
    if index.options.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|v| v.cloned().unwrap_or(Bson::Null))
            .collect(),
    )
}

fn keys_equal(a: &[Bson], b: &[Bson]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn duplicate_key_payload(collection: &str, index: &IndexSpec, document: &Document) -> Document {
    let mut dup_key = Document::new();
    for field in index.keys.keys() {
        dup_key.insert(field, document.get(field).cloned().unwrap_or(Bson::Null));
    }
    doc! {
        "code": codes::DUPLICATE_KEY,
        "codeName": "DuplicateKey",
        "errmsg": format!(
            "E11000 duplicate key error collection: {} index: {} dup key: {}",
            collection,
            default_index_name(&index.keys),
            to_json(&dup_key),
        ),
    }
}

fn with_ok_zero(payload: Document) -> Document {
    let mut failed = doc! { "ok": 0 };
    for (key, value) in payload {
        failed.insert(key, value);
    }
    failed
}

// ----------------------------------------------------------------------------
// $jsonSchema validation
// ----------------------------------------------------------------------------

fn validate(document: &Document, validator: &Document) -> Result<(), String> {
    match validator.get_document("$jsonSchema") {
        Ok(schema) => check_schema(document, schema),
        Err(_) => Ok(()),
    }
}

fn check_schema(document: &Document, schema: &Document) -> Result<(), String> {
    if let Ok(required) = schema.get_array("required") {
        for field in required.iter().filter_map(Bson::as_str) {
            if !document.contains_key(field) {
                return Err(format!("missing required field '{}'", field));
            }
        }
    }

    if let Ok(properties) = schema.get_document("properties") {
        for (field, rules) in properties {
            if let (Some(value), Bson::Document(rules)) = (document.get(field), rules) {
                check_property(field, value, rules)?;
            }
        }
    }

    Ok(())
}

fn check_property(field: &str, value: &Bson, rules: &Document) -> Result<(), String> {
    let allowed: Vec<&str> = match rules.get("bsonType") {
        Some(Bson::String(name)) => vec![name.as_str()],
        Some(Bson::Array(names)) => names.iter().filter_map(Bson::as_str).collect(),
        _ => vec![],
    };
    if !allowed.is_empty() && !allowed.iter().any(|name| bson_type_matches(name, value)) {
        return Err(format!("field '{}' must be of bsonType {:?}", field, allowed));
    }

    let actual = as_number(value);
    if let (Some(minimum), Some(actual)) = (rules.get("minimum").and_then(as_number), actual) {
        if actual < minimum {
            return Err(format!("field '{}' must be >= {}", field, minimum));
        }
    }
    if let (Some(maximum), Some(actual)) = (rules.get("maximum").and_then(as_number), actual) {
        if actual > maximum {
            return Err(format!("field '{}' must be <= {}", field, maximum));
        }
    }

    Ok(())
}

fn bson_type_matches(name: &str, value: &Bson) -> bool {
    match (name, value) {
        ("int", Bson::Int32(_))
        | ("long", Bson::Int64(_))
        | ("double", Bson::Double(_))
        | ("date", Bson::DateTime(_))
        | ("string", Bson::String(_))
        | ("object", Bson::Document(_))
        | ("array", Bson::Array(_))
        | ("bool", Bson::Boolean(_))
        | ("objectId", Bson::ObjectId(_))
        | ("null", Bson::Null) => true,
        ("number", value) => as_number(value).is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_validator() -> Document {
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

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let store = MemoryStore::new();
        store.insert_one("cats", doc! { "name": "Tom" }).await.unwrap();

        let found = store
            .find_one("cats", doc! { "name": "Tom" })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(found.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(found.keys().next().map(String::as_str), Some("_id"));
    }

    #[tokio::test]
    async fn test_create_collection_twice_fails() {
        let store = MemoryStore::new();
        assert!(store.create_collection("migrations", None).await.unwrap().is_ok());

        let outcome = store.create_collection("migrations", None).await.unwrap();
        assert!(!outcome.is_ok());
        assert_eq!(
            outcome.payload().get_i32("code").unwrap(),
            codes::NAMESPACE_EXISTS
        );
    }

    #[tokio::test]
    async fn test_validator_rejects_bad_documents() {
        let store = MemoryStore::new();
        store
            .create_collection("migrations", Some(ledger_validator()))
            .await
            .unwrap();

        let now = mongodb::bson::DateTime::now();
        store
            .insert_one("migrations", doc! { "version": 1, "ctime": now })
            .await
            .unwrap();

        for bad in [
            doc! { "version": 0, "ctime": now },
            doc! { "version": 2_i64, "ctime": now },
            doc! { "version": 2, "ctime": "yesterday" },
            doc! { "version": 2 },
        ] {
            let err = store.insert_one("migrations", bad).await.unwrap_err();
            assert!(matches!(err, AppError::DocumentValidation { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let store = MemoryStore::new();
        let index = IndexSpec::new(doc! { "version": 1 }).with_options(IndexOptions::unique());
        assert!(store.create_index("migrations", index).await.unwrap().is_ok());

        store.insert_one("migrations", doc! { "version": 2 }).await.unwrap();
        let err = store
            .insert_one("migrations", doc! { "version": 2_i64 })
            .await
            .unwrap_err();

        match err {
            AppError::DuplicateKey { collection, payload } => {
                assert_eq!(collection, "migrations");
                assert!(payload.contains("E11000"));
                assert!(payload.contains("version_1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_sparse_unique_index_skips_missing_fields() {
        let store = MemoryStore::new();
        let index = IndexSpec::new(doc! { "email": 1 }).with_options(IndexOptions {
            unique: true,
            sparse: true,
        });
        store.create_index("owners", index).await.unwrap();

        store.insert_one("owners", doc! { "name": "a" }).await.unwrap();
        store.insert_one("owners", doc! { "name": "b" }).await.unwrap();
        assert!(store
            .insert_one("owners", doc! { "email": "x@y.z" })
            .await
            .is_ok());
        assert!(store
            .insert_one("owners", doc! { "email": "x@y.z" })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_create_identical_index_is_noop() {
        let store = MemoryStore::new();
        let index = IndexSpec::new(doc! { "name": 1 }).with_options(IndexOptions::unique());

        assert!(store.create_index("cats", index.clone()).await.unwrap().is_ok());
        let again = store.create_index("cats", index).await.unwrap();
        assert!(again.is_ok());
        assert_eq!(store.list_indexes("cats").await.unwrap().len(), 2);

        let conflicting = IndexSpec::new(doc! { "name": 1 });
        let outcome = store.create_index("cats", conflicting).await.unwrap();
        assert_eq!(
            outcome.payload().get_i32("code").unwrap(),
            codes::INDEX_OPTIONS_CONFLICT
        );
    }

    #[tokio::test]
    async fn test_drop_index_errors() {
        let store = MemoryStore::new();
        let missing_ns = store.drop_index("cats", "name_1").await.unwrap();
        assert_eq!(
            missing_ns.payload().get_i32("code").unwrap(),
            codes::NAMESPACE_NOT_FOUND
        );

        store.create_collection("cats", None).await.unwrap();
        let id_index = store.drop_index("cats", ID_INDEX).await.unwrap();
        assert!(!id_index.is_ok());
    }

    #[tokio::test]
    async fn test_find_sorts_and_delete_one() {
        let store = MemoryStore::new();
        for version in [3, 1, 2] {
            store
                .insert_one("migrations", doc! { "version": version })
                .await
                .unwrap();
        }

        let sorted = store
            .find("migrations", doc! {}, Some(doc! { "version": 1 }))
            .await
            .unwrap();
        let versions: Vec<i32> = sorted.iter().map(|d| d.get_i32("version").unwrap()).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        assert_eq!(
            store
                .delete_one("migrations", doc! { "version": 2 })
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .delete_one("migrations", doc! { "version": 2 })
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store.find("migrations", doc! {}, None).await.unwrap().len(),
            2
        );
    }
}

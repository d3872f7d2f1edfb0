//! MongoDB backend implementation.
//!
//! # Example
//!
//! ```ignore
//! use docmigrate::config::Config;
//! use docmigrate::store::backends::MongoStore;
//!
//! let config = Config::load()?;
//! let store = MongoStore::connect(&config.mongodb).await?;
//! ```

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, CreateCollectionOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::config::{MongoConfig, DEFAULT_DATABASE};
use crate::error::AppError;
use crate::store::{
    codes, to_json, CollectionInfo, CommandOutcome, DocumentStore, IndexOptions, IndexSpec,
};

/// [`DocumentStore`] backed by a MongoDB database.
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connects using the configured URL and verifies the server responds.
    ///
    /// The database is `config.database`, else the URL's default database,
    /// else [`DEFAULT_DATABASE`].
    pub async fn connect(config: &MongoConfig) -> Result<Self, AppError> {
        let mut options = ClientOptions::parse(&config.url).await?;
        options.max_pool_size = Some(config.max_pool_size);
        options.retry_writes = Some(config.retry_writes);

        let database_name = config
            .database
            .clone()
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        Ok(Self::new(client, &database_name))
    }

    pub fn new(client: Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self { client, database }
    }

    /// Mongodb client uses Arc internally, so cloning is cheap.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

/// Turns a server-side command rejection into a failed outcome; any other
/// error (network, auth, ...) stays an error.
fn command_outcome(err: mongodb::error::Error) -> Result<CommandOutcome, AppError> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Ok(CommandOutcome::failure(
            command.code,
            &command.code_name,
            command.message.clone(),
        )),
        _ => Err(err.into()),
    }
}

fn classify_write_error(collection: &str, err: mongodb::error::Error) -> AppError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        let payload = to_json(&doc! {
            "code": write_error.code,
            "codeName": write_error.code_name.clone(),
            "errmsg": write_error.message.clone(),
            "errInfo": write_error.details.clone(),
        });
        match write_error.code {
            codes::DUPLICATE_KEY => {
                return AppError::DuplicateKey {
                    collection: collection.to_string(),
                    payload,
                }
            }
            codes::DOCUMENT_VALIDATION_FAILURE => {
                return AppError::DocumentValidation {
                    collection: collection.to_string(),
                    payload,
                }
            }
            _ => {}
        }
    }
    err.into()
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Command(command) if command.code == codes::NAMESPACE_NOT_FOUND
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
    ) -> Result<CommandOutcome, AppError> {
        let options = CreateCollectionOptions::builder()
            .validator(validator)
            .build();

        match self.database.create_collection(name).with_options(options).await {
            Ok(()) => Ok(CommandOutcome::success(Document::new())),
            Err(err) => command_outcome(err),
        }
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>, AppError> {
        let mut cursor = self
            .database
            .list_collections()
            .filter(doc! { "name": name })
            .await?;

        Ok(cursor.try_next().await?.map(|spec| CollectionInfo {
            name: spec.name,
            validator: spec.options.validator,
        }))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, AppError> {
        Ok(self.collection(collection).find_one(filter).await?)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<Document>, AppError> {
        let target = self.collection(collection);
        let mut query = target.find(filter);
        if let Some(sort) = sort {
            query = query.sort(sort);
        }

        let cursor = query.await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), AppError> {
        self.collection(collection)
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(|err| classify_write_error(collection, err))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    async fn create_index(
        &self,
        collection: &str,
        index: IndexSpec,
    ) -> Result<CommandOutcome, AppError> {
        let options = mongodb::options::IndexOptions::builder()
            .name(index.name)
            .unique(index.options.unique)
            .sparse(index.options.sparse)
            .build();
        let model = IndexModel::builder()
            .keys(index.keys)
            .options(options)
            .build();

        match self.collection(collection).create_index(model).await {
            Ok(result) => Ok(CommandOutcome::success(doc! {
                "createdIndex": result.index_name,
            })),
            Err(err) => command_outcome(err),
        }
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<CommandOutcome, AppError> {
        match self.collection(collection).drop_index(name).await {
            Ok(()) => Ok(CommandOutcome::success(doc! { "dropped": name })),
            Err(err) => command_outcome(err),
        }
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, AppError> {
        let cursor = match self.collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(err) if is_namespace_not_found(&err) => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let models: Vec<IndexModel> = cursor.try_collect().await?;
        Ok(models
            .into_iter()
            .map(|model| {
                let options = model.options.unwrap_or_default();
                IndexSpec {
                    keys: model.keys,
                    name: options.name,
                    options: IndexOptions {
                        unique: options.unique.unwrap_or(false),
                        sparse: options.sparse.unwrap_or(false),
                    },
                }
            })
            .collect())
    }
}

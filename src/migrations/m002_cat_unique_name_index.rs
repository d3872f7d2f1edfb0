//! Unique index on `cats.name`.

use futures::future::BoxFuture;
use futures::FutureExt;
use mongodb::bson::doc;

use crate::error::AppError;
use crate::store::{create_indexes, DocumentStore, IndexOptions};

use super::Migration;

pub struct M002CatUniqueNameIndex;

impl Migration for M002CatUniqueNameIndex {
    fn id(&self) -> &'static str {
        "m002_cat_unique_name_index"
    }

    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Unique index on cats.name"
    }

    fn up<'a>(&'a self, store: &'a dyn DocumentStore) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            create_indexes(store, "cats", &[doc! { "name": 1 }], IndexOptions::unique()).await?;
            Ok(())
        }
        .boxed()
    }
}

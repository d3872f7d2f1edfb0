//! Ledger bootstrap - the `migrations` collection and its version index.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::AppError;
use crate::store::DocumentStore;

use super::{Ledger, Migration};

/// Creates the ledger collection this runner records into.
///
/// Runs through the runner like any other migration, so the first ledger
/// entry written is the one for this version.
pub struct M001MigrationVersion;

impl Migration for M001MigrationVersion {
    fn id(&self) -> &'static str {
        "m001_migration_version"
    }

    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Ledger collection with validator and unique version index"
    }

    fn up<'a>(&'a self, store: &'a dyn DocumentStore) -> BoxFuture<'a, Result<(), AppError>> {
        Ledger::initialize(store).boxed()
    }
}

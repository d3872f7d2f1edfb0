//! Versioned schema migrations for MongoDB.
//!
//! Migrations are:
//! - **Run-once**: each version is recorded in the `migrations` ledger and
//!   skipped on every later run
//! - **Forward-only**: no rollback; write a new migration to undo a change
//! - **Retried in full**: a failed body leaves no ledger entry, so the next run
//!   starts it from the top
//! - **Claimed**: a body only runs while its process holds the version's entry
//!   in `migration_locks`, so two processes never run the same body

mod claim;
mod ledger;
mod m001_migration_version;
mod m002_cat_unique_name_index;
mod runner;
mod traits;

use std::sync::Arc;

pub use claim::{Claims, LOCKS_COLLECTION};
pub use ledger::{Ledger, LEDGER_COLLECTION};
pub use m001_migration_version::M001MigrationVersion;
pub use m002_cat_unique_name_index::M002CatUniqueNameIndex;
pub use runner::{RunOutcome, Runner};
pub use traits::{Migration, MigrationResult, Register};

use crate::error::AppError;
use crate::store::DocumentStore;

/// Every migration shipped with this crate, in version order.
pub fn create_register() -> Register {
    Register::new()
        .register(M001MigrationVersion)
        .register(M002CatUniqueNameIndex)
}

/// Runs all pending migrations against `store`.
pub async fn run_migrations(store: Arc<dyn DocumentStore>) -> Result<MigrationResult, AppError> {
    let runner = Runner::new(store);
    let result = create_register().run_pending(&runner).await?;

    tracing::info!(
        applied = ?result.applied,
        skipped = result.skipped.len(),
        "Migrations complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;

    use super::*;
    use crate::store::backends::MemoryStore;

    #[test]
    fn test_register_is_consistent() {
        let register = create_register();
        assert!(register.check().is_ok());

        let versions: Vec<u32> = register.iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_run_migrations_on_fresh_database() {
        let store = Arc::new(MemoryStore::new());

        let first = run_migrations(store.clone()).await.unwrap();
        assert_eq!(
            first.applied,
            vec!["m001_migration_version", "m002_cat_unique_name_index"]
        );

        let second = run_migrations(store.clone()).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped.len(), 2);

        let entries = Ledger::new(store.clone()).entries().await.unwrap();
        let versions: Vec<i32> = entries.iter().map(|e| e.version.get()).collect();
        assert_eq!(versions, vec![1, 2]);

        assert!(store
            .find(LOCKS_COLLECTION, doc! {}, None)
            .await
            .unwrap()
            .is_empty());
    }
}

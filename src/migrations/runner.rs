//! At-most-once execution of migrations against the ledger.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use crate::error::AppError;
use crate::migrations::claim::Claims;
use crate::migrations::ledger::Ledger;
use crate::migrations::traits::Migration;
use crate::models::{LedgerEntry, Version};
use crate::store::DocumentStore;

/// What [`Runner::run`] did with a version.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The body ran and this entry was recorded.
    Applied(LedgerEntry),
    /// The version was already recorded; nothing ran.
    Skipped(LedgerEntry),
}

impl RunOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            RunOutcome::Applied(entry) | RunOutcome::Skipped(entry) => entry,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, RunOutcome::Applied(_))
    }
}

/// Runs migration bodies at most once per ledger.
pub struct Runner {
    store: Arc<dyn DocumentStore>,
    ledger: Ledger,
    claims: Claims,
}

impl Runner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            claims: Claims::new(store.clone()),
            store,
        }
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Runs `action` unless `version` is already recorded.
    ///
    /// 1. Normalizes `version`; returns [`RunOutcome::Skipped`] if the ledger
    ///    has it.
    /// 2. Claims the version, so a concurrent run of the same version fails
    ///    with [`AppError::UniquenessViolation`] instead of running the body.
    /// 3. Re-checks the ledger, then runs `action` with no timeout.
    /// 4. On success appends a ledger entry. On failure the error is returned
    ///    unchanged and nothing is recorded.
    /// 5. Releases the claim in every case.
    pub async fn run<F, Fut>(&self, version: i64, action: F) -> Result<RunOutcome, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        let version = Version::new(version)?;

        if let Some(entry) = self.ledger.lookup(version).await? {
            return skip(entry);
        }

        self.claims.acquire(version).await?;
        let result = self.execute(version, action).await;

        if let Err(err) = self.claims.release(version).await {
            tracing::error!(
                version = version.get(),
                error = %err,
                "Failed to release claim; release it with `docmigrate unlock {}`",
                version
            );
        }

        result
    }

    /// Runs a registered migration through [`Runner::run`].
    pub async fn run_migration(&self, migration: &dyn Migration) -> Result<RunOutcome, AppError> {
        tracing::debug!(
            id = migration.id(),
            version = migration.version(),
            "{}",
            migration.description()
        );
        self.run(i64::from(migration.version()), || {
            migration.up(self.store.as_ref())
        })
        .await
    }

    async fn execute<F, Fut>(&self, version: Version, action: F) -> Result<RunOutcome, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        // A run that finished between our lookup and our claim has recorded it.
        if let Some(entry) = self.ledger.lookup(version).await? {
            return skip(entry);
        }

        tracing::info!(version = version.get(), "Running migration {}", version);
        if let Err(err) = action().await {
            tracing::error!(
                version = version.get(),
                error = %err,
                "Migration {} failed, not recorded",
                version
            );
            return Err(err);
        }

        let entry = self.ledger.append(version, Utc::now()).await?;
        tracing::info!(version = version.get(), "Successfully ran migration {}", version);
        Ok(RunOutcome::Applied(entry))
    }
}

fn skip(entry: LedgerEntry) -> Result<RunOutcome, AppError> {
    tracing::info!(
        version = entry.version.get(),
        "Already ran migration #{}, skipping",
        entry.to_json()?
    );
    Ok(RunOutcome::Skipped(entry))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mockall::Sequence;
    use mongodb::bson::doc;

    use super::*;
    use crate::migrations::claim::LOCKS_COLLECTION;
    use crate::migrations::ledger::LEDGER_COLLECTION;
    use crate::store::backends::MemoryStore;
    use crate::store::MockDocumentStore;

    async fn must_not_run() -> Result<(), AppError> {
        panic!("body must not run for a recorded version")
    }

    fn memory_runner() -> (Arc<MemoryStore>, Runner) {
        let store = Arc::new(MemoryStore::new());
        let runner = Runner::new(store.clone());
        (store, runner)
    }

    async fn ledger_count(store: &MemoryStore, version: i32) -> usize {
        store
            .find(LEDGER_COLLECTION, doc! { "version": version }, None)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_run_applies_once() {
        let (store, runner) = memory_runner();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            runner
                .run(7, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger_count(&store, 7).await, 1);
    }

    #[tokio::test]
    async fn test_run_returns_recorded_entry_on_skip() {
        let (_, runner) = memory_runner();

        let applied = runner.run(4, || async { Ok(()) }).await.unwrap();
        assert!(applied.is_applied());

        let skipped = runner.run(4, || async { Ok(()) }).await.unwrap();
        assert!(!skipped.is_applied());
        assert_eq!(skipped.entry(), applied.entry());
    }

    #[tokio::test]
    async fn test_failed_action_is_not_recorded_and_can_be_retried() {
        let (store, runner) = memory_runner();

        let err = runner
            .run(5, || async {
                Err(AppError::IndexOperation {
                    operation: "createIndex(name_1)".to_string(),
                    collection: "cats".to_string(),
                    payload: r#"{"ok":0,"code":11000}"#.to_string(),
                })
            })
            .await
            .unwrap_err();

        // Propagated unchanged.
        match err {
            AppError::IndexOperation { payload, .. } => assert!(payload.contains("11000")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger_count(&store, 5).await, 0);
        assert!(store
            .find_one(LOCKS_COLLECTION, doc! { "_id": 5 })
            .await
            .unwrap()
            .is_none());

        let retried = runner.run(5, || async { Ok(()) }).await.unwrap();
        assert!(retried.is_applied());
        assert_eq!(ledger_count(&store, 5).await, 1);
    }

    #[tokio::test]
    async fn test_invalid_version_runs_nothing() {
        let (_, runner) = memory_runner();
        let calls = AtomicUsize::new(0);

        let err = runner
            .run(0, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidVersion(0)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_execute_body_once() {
        let store = Arc::new(MemoryStore::new());
        let first = Runner::new(store.clone())
            .with_claims(Claims::new(store.clone()).with_holder("process-a"));
        let second = Runner::new(store.clone())
            .with_claims(Claims::new(store.clone()).with_holder("process-b"));
        let calls = &AtomicUsize::new(0);

        let body = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        };
        let (a, b) = tokio::join!(first.run(3, body), second.run(3, body));

        let results = [a, b];
        let applied = results.iter().filter(|r| matches!(r, Ok(o) if o.is_applied())).count();
        let violations = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_uniqueness_violation()))
            .count();

        assert_eq!(applied, 1);
        assert_eq!(violations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger_count(&store, 3).await, 1);
    }

    #[tokio::test]
    async fn test_held_claim_blocks_run() {
        let store = Arc::new(MemoryStore::new());
        Claims::new(store.clone())
            .with_holder("crashed:42")
            .acquire(Version::new(8).unwrap())
            .await
            .unwrap();

        let runner = Runner::new(store.clone());
        let err = runner.run(8, || async { Ok(()) }).await.unwrap_err();
        assert!(err.is_uniqueness_violation());
        assert_eq!(ledger_count(&store, 8).await, 0);
    }

    #[tokio::test]
    async fn test_skip_performs_no_writes() {
        let recorded = doc! {
            "_id": mongodb::bson::oid::ObjectId::new(),
            "version": 2,
            "ctime": mongodb::bson::DateTime::now(),
        };

        let mut mock = MockDocumentStore::new();
        mock.expect_find_one()
            .withf(|collection, filter| {
                collection == LEDGER_COLLECTION && filter == &doc! { "version": 2 }
            })
            .times(1)
            .returning(move |_, _| Ok(Some(recorded.clone())));
        // Any other store call fails the test.

        let runner = Runner::new(Arc::new(mock));
        let outcome = runner
            .run(2, must_not_run)
            .await
            .unwrap();
        assert_eq!(outcome.entry().version.get(), 2);
    }

    #[tokio::test]
    async fn test_recheck_after_claim_skips_completed_run() {
        let recorded = doc! { "version": 9, "ctime": mongodb::bson::DateTime::now() };
        let mut seq = Sequence::new();
        let mut mock = MockDocumentStore::new();

        mock.expect_find_one()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_insert_one()
            .withf(|collection, _| collection == LOCKS_COLLECTION)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_find_one()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Some(recorded.clone())));
        mock.expect_delete_one()
            .withf(|collection, _| collection == LOCKS_COLLECTION)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(1));

        let runner = Runner::new(Arc::new(mock));
        let outcome = runner
            .run(9, must_not_run)
            .await
            .unwrap();
        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn test_release_failure_keeps_applied_outcome() {
        let mut mock = MockDocumentStore::new();

        mock.expect_find_one()
            .withf(|collection, _| collection == LEDGER_COLLECTION)
            .times(2)
            .returning(|_, _| Ok(None));
        mock.expect_insert_one()
            .withf(|collection, _| collection == LOCKS_COLLECTION)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_insert_one()
            .withf(|collection, document| {
                collection == LEDGER_COLLECTION && document.get_i32("version").ok() == Some(6)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_delete_one()
            .withf(|collection, _| collection == LOCKS_COLLECTION)
            .times(1)
            .returning(|_, _| {
                Err(AppError::Database(mongodb::error::Error::from(
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
                )))
            });

        let calls = &AtomicUsize::new(0);
        let runner = Runner::new(Arc::new(mock));
        let outcome = runner
            .run(6, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(outcome.entry().version.get(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

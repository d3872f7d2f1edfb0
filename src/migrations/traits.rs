//! Migration trait and registry.

use futures::future::BoxFuture;

use crate::error::AppError;
use crate::migrations::runner::{RunOutcome, Runner};
use crate::models::Version;
use crate::store::DocumentStore;

// =============================================================================
// Migration Trait
// =============================================================================

/// A single schema change with a fixed version.
///
/// Bodies run at most once per ledger. A body that fails part-way is retried
/// in full on the next run, so each step must tolerate being re-applied up to
/// the point of failure.
pub trait Migration: Send + Sync {
    fn id(&self) -> &'static str;
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up<'a>(&'a self, store: &'a dyn DocumentStore) -> BoxFuture<'a, Result<(), AppError>>;
}

// =============================================================================
// Migration Registry
// =============================================================================

/// Result of running registered migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    /// IDs of migrations executed by this run.
    pub applied: Vec<String>,
    /// IDs of migrations already recorded in the ledger.
    pub skipped: Vec<String>,
}

/// Ordered set of migrations, sorted by version.
pub struct Register {
    migrations: Vec<Box<dyn Migration>>,
}

impl Register {
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    pub fn register(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self.migrations.sort_by_key(|m| m.version());
        self
    }

    /// Iterate over migrations in version order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> {
        self.migrations.iter().map(|m| m.as_ref())
    }

    pub fn get(&self, version: u32) -> Option<&dyn Migration> {
        self.iter().find(|m| m.version() == version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Rejects invalid versions and versions registered twice.
    pub fn check(&self) -> Result<(), AppError> {
        for migration in &self.migrations {
            Version::new(i64::from(migration.version()))?;
        }
        for pair in self.migrations.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(AppError::DuplicateMigration {
                    version: pair[0].version(),
                    first: pair[0].id(),
                    second: pair[1].id(),
                });
            }
        }
        Ok(())
    }

    /// Runs every migration in version order, skipping recorded ones.
    ///
    /// Stops at the first failure; migrations after it are not attempted.
    pub async fn run_pending(&self, runner: &Runner) -> Result<MigrationResult, AppError> {
        self.check()?;

        let mut result = MigrationResult::default();
        for migration in self.iter() {
            match runner.run_migration(migration).await? {
                RunOutcome::Applied(_) => result.applied.push(migration.id().to_string()),
                RunOutcome::Skipped(_) => result.skipped.push(migration.id().to_string()),
            }
        }
        Ok(result)
    }

    /// Runs the migration registered as `version`, unless already recorded.
    ///
    /// Every version after the first needs the ledger collection created by
    /// migration 1. Without it the entry would land in an implicitly created
    /// collection with no validator or unique index, and migration 1 could
    /// never run afterwards.
    pub async fn run_one(&self, runner: &Runner, version: u32) -> Result<RunOutcome, AppError> {
        self.check()?;
        let migration = self
            .get(version)
            .ok_or(AppError::UnknownMigration(version))?;

        if version > 1 && !runner.ledger().exists().await? {
            return Err(AppError::LedgerNotInitialized { version });
        }

        runner.run_migration(migration).await
    }
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

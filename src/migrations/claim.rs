//! Execution claims.
//!
//! A run inserts a [`Claim`] keyed by version before executing a migration
//! body and deletes it afterwards. The store allows one document per `_id`,
//! so two processes racing on the same unrecorded version cannot both run
//! its body: the second insert fails and surfaces as
//! [`AppError::UniquenessViolation`].

use std::sync::Arc;

use chrono::Utc;
use mongodb::bson::doc;

use crate::config::get_env;
use crate::error::AppError;
use crate::models::{Claim, Version};
use crate::store::DocumentStore;

/// Collection holding in-flight claims.
pub const LOCKS_COLLECTION: &str = "migration_locks";

/// Acquires and releases claims on behalf of one process.
#[derive(Clone)]
pub struct Claims {
    store: Arc<dyn DocumentStore>,
    holder: String,
}

impl Claims {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            holder: format!("{}:{}", get_env("HOSTNAME", "localhost"), std::process::id()),
        }
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Claims `version` for this holder.
    pub async fn acquire(&self, version: Version) -> Result<Claim, AppError> {
        let claim = Claim {
            version,
            holder: self.holder.clone(),
            claimed_at: Utc::now(),
        };
        let document = mongodb::bson::to_document(&claim)?;

        match self.store.insert_one(LOCKS_COLLECTION, document).await {
            Ok(()) => {
                tracing::debug!(version = version.get(), holder = %self.holder, "Claimed migration");
                Ok(claim)
            }
            Err(AppError::DuplicateKey { .. }) => {
                match self.current(version).await? {
                    Some(existing) => tracing::warn!(
                        version = version.get(),
                        holder = %existing.holder,
                        claimed_at = %existing.claimed_at,
                        "Migration {} is being run by {}. If that process is gone, run `docmigrate unlock {}`",
                        version,
                        existing.holder,
                        version
                    ),
                    None => tracing::warn!(
                        version = version.get(),
                        "Migration {} was claimed by a concurrent run",
                        version
                    ),
                }
                Err(AppError::UniquenessViolation {
                    version: version.get(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// The claim currently held on `version`, if any.
    pub async fn current(&self, version: Version) -> Result<Option<Claim>, AppError> {
        let found = self
            .store
            .find_one(LOCKS_COLLECTION, doc! { "_id": version })
            .await?;

        Ok(found.map(mongodb::bson::from_document).transpose()?)
    }

    /// Releases this holder's claim on `version`. Returns whether a claim
    /// was removed.
    pub async fn release(&self, version: Version) -> Result<bool, AppError> {
        let deleted = self
            .store
            .delete_one(
                LOCKS_COLLECTION,
                doc! { "_id": version, "holder": self.holder.as_str() },
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Releases the claim on `version` whoever holds it.
    pub async fn force_release(&self, version: Version) -> Result<Option<Claim>, AppError> {
        let existing = self.current(version).await?;
        if existing.is_some() {
            self.store
                .delete_one(LOCKS_COLLECTION, doc! { "_id": version })
                .await?;
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backends::MemoryStore;

    fn version(raw: i64) -> Version {
        Version::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_second_acquire_is_rejected() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let first = Claims::new(store.clone()).with_holder("host-a:1");
        let second = Claims::new(store).with_holder("host-b:2");

        let claim = first.acquire(version(3)).await.unwrap();
        assert_eq!(claim.holder, "host-a:1");

        let err = second.acquire(version(3)).await.unwrap_err();
        assert!(matches!(err, AppError::UniquenessViolation { version: 3 }));

        // Other versions are independent.
        assert!(second.acquire(version(4)).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_only_removes_own_claim() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let owner = Claims::new(store.clone()).with_holder("host-a:1");
        let other = Claims::new(store).with_holder("host-b:2");

        owner.acquire(version(5)).await.unwrap();
        assert!(!other.release(version(5)).await.unwrap());
        assert!(owner.current(version(5)).await.unwrap().is_some());

        assert!(owner.release(version(5)).await.unwrap());
        assert!(owner.current(version(5)).await.unwrap().is_none());
        assert!(other.acquire(version(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_release_removes_stale_claim() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let crashed = Claims::new(store.clone()).with_holder("host-a:1");
        let operator = Claims::new(store).with_holder("operator");

        crashed.acquire(version(6)).await.unwrap();
        let released = operator.force_release(version(6)).await.unwrap();
        assert_eq!(released.map(|c| c.holder), Some("host-a:1".to_string()));
        assert!(operator.force_release(version(6)).await.unwrap().is_none());
        assert!(operator.acquire(version(6)).await.is_ok());
    }
}

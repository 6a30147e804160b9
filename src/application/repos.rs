//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::cache::{CacheEntry, CacheKey, KeyFilter};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// A persisted key as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub key_name: String,
    pub value: String,
    pub created: OffsetDateTime,
}

/// The keyed cache table and its bundle partitions.
///
/// Reads never return expired rows. Writes are last-writer-wins.
#[async_trait]
pub trait VariablesRepo: Send + Sync {
    async fn get_key(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<String>, RepoError>;

    async fn insert_key(&self, entry: &CacheEntry) -> Result<(), RepoError>;

    async fn update_key(&self, entry: &CacheEntry) -> Result<(), RepoError>;

    async fn delete_key(&self, key: &CacheKey) -> Result<u64, RepoError>;

    async fn delete_matching_keys(&self, filter: &KeyFilter) -> Result<u64, RepoError>;

    /// Live keys selected by `filter`, oldest first.
    async fn list_keys(
        &self,
        filter: &KeyFilter,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredKey>, RepoError>;

    async fn prune_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;

    /// Delete every key, or every key of one site.
    async fn flush_cache(&self, site_id: Option<i64>) -> Result<u64, RepoError>;

    async fn get_bundle_id(&self, name: &str) -> Result<Option<i64>, RepoError>;

    async fn insert_bundle(&self, name: &str, label: &str) -> Result<i64, RepoError>;
}

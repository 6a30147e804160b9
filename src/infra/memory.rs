//! In-process gateway for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use regex::Regex;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, StoredKey, VariablesRepo};
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{CacheEntry, CacheKey, KeyFilter, KeyMatch};

const SOURCE: &str = "stash::infra::memory";
const BUILTIN_BUNDLES: [&str; 3] = ["default", "template", "static"];

#[derive(Debug, Clone)]
struct StoredRow {
    seq: i64,
    label: String,
    value: String,
    created: OffsetDateTime,
    expire: Option<OffsetDateTime>,
}

impl StoredRow {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expire.is_none_or(|expire| expire > now)
    }
}

/// Keyed cache table held in memory. Survives only as long as the process.
pub struct MemoryRepository {
    rows: RwLock<HashMap<CacheKey, StoredRow>>,
    bundles: RwLock<HashMap<String, (i64, String)>>,
    next_bundle_id: AtomicI64,
    next_seq: AtomicI64,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        let bundles = BUILTIN_BUNDLES
            .iter()
            .zip(1..)
            .map(|(name, id)| (name.to_string(), (id, name.to_string())))
            .collect::<HashMap<_, _>>();
        Self {
            rows: RwLock::new(HashMap::new()),
            next_bundle_id: AtomicI64::new(bundles.len() as i64 + 1),
            bundles: RwLock::new(bundles),
            next_seq: AtomicI64::new(1),
        }
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.rows, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label recorded with a stored key.
    pub fn label(&self, key: &CacheKey) -> Option<String> {
        rw_read(&self.rows, SOURCE, "label")
            .get(key)
            .map(|row| row.label.clone())
    }

    /// Creation time recorded with a stored key.
    pub fn created(&self, key: &CacheKey) -> Option<OffsetDateTime> {
        rw_read(&self.rows, SOURCE, "created")
            .get(key)
            .map(|row| row.created)
    }

    fn matcher(filter: &KeyFilter) -> Result<Option<Regex>, RepoError> {
        match &filter.key {
            KeyMatch::Regex(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|err| RepoError::InvalidInput {
                    message: err.to_string(),
                }),
            _ => Ok(None),
        }
    }

    fn selects(filter: &KeyFilter, regex: Option<&Regex>, key: &CacheKey, row: &StoredRow) -> bool {
        if key.site_id != filter.site_id {
            return false;
        }
        if filter.bundle_id.is_some_and(|id| id != key.bundle_id) {
            return false;
        }
        if filter
            .session_id
            .as_ref()
            .is_some_and(|session| *session != key.session_id)
        {
            return false;
        }
        if filter.created_before.is_some_and(|cutoff| row.created >= cutoff) {
            return false;
        }
        match (&filter.key, regex) {
            (KeyMatch::Exact(name), _) => *name == key.key_name,
            (KeyMatch::Regex(_), Some(regex)) => regex.is_match(&key.key_name),
            (KeyMatch::Regex(_), None) => false,
            (KeyMatch::All, _) => true,
        }
    }

    fn write(&self, entry: &CacheEntry, op: &'static str) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        rw_write(&self.rows, SOURCE, op).insert(
            entry.key.clone(),
            StoredRow {
                seq,
                label: entry.label.clone(),
                value: entry.value.clone(),
                created: entry.created,
                expire: entry.expire,
            },
        );
    }
}

#[async_trait]
impl VariablesRepo for MemoryRepository {
    async fn get_key(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<String>, RepoError> {
        Ok(rw_read(&self.rows, SOURCE, "get_key")
            .get(key)
            .filter(|row| row.is_live(now))
            .map(|row| row.value.clone()))
    }

    async fn insert_key(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        self.write(entry, "insert_key");
        Ok(())
    }

    async fn update_key(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        let mut rows = rw_write(&self.rows, SOURCE, "update_key");
        if let Some(row) = rows.get_mut(&entry.key) {
            row.value = entry.value.clone();
            row.created = entry.created;
            row.expire = entry.expire;
        }
        Ok(())
    }

    async fn delete_key(&self, key: &CacheKey) -> Result<u64, RepoError> {
        let removed = rw_write(&self.rows, SOURCE, "delete_key").remove(key);
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_matching_keys(&self, filter: &KeyFilter) -> Result<u64, RepoError> {
        let regex = Self::matcher(filter)?;
        let mut rows = rw_write(&self.rows, SOURCE, "delete_matching_keys");
        let before = rows.len();
        rows.retain(|key, row| !Self::selects(filter, regex.as_ref(), key, row));
        Ok((before - rows.len()) as u64)
    }

    async fn list_keys(
        &self,
        filter: &KeyFilter,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredKey>, RepoError> {
        let regex = Self::matcher(filter)?;
        let rows = rw_read(&self.rows, SOURCE, "list_keys");
        let mut selected: Vec<(&CacheKey, &StoredRow)> = rows
            .iter()
            .filter(|(key, row)| row.is_live(now) && Self::selects(filter, regex.as_ref(), key, row))
            .collect();
        selected.sort_by_key(|(_, row)| (row.created, row.seq));
        Ok(selected
            .into_iter()
            .map(|(key, row)| StoredKey {
                key_name: key.key_name.clone(),
                value: row.value.clone(),
                created: row.created,
            })
            .collect())
    }

    async fn prune_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut rows = rw_write(&self.rows, SOURCE, "prune_expired");
        let before = rows.len();
        rows.retain(|_, row| row.is_live(now));
        Ok((before - rows.len()) as u64)
    }

    async fn flush_cache(&self, site_id: Option<i64>) -> Result<u64, RepoError> {
        let mut rows = rw_write(&self.rows, SOURCE, "flush_cache");
        let before = rows.len();
        match site_id {
            Some(site_id) => rows.retain(|key, _| key.site_id != site_id),
            None => rows.clear(),
        }
        Ok((before - rows.len()) as u64)
    }

    async fn get_bundle_id(&self, name: &str) -> Result<Option<i64>, RepoError> {
        Ok(rw_read(&self.bundles, SOURCE, "get_bundle_id")
            .get(name)
            .map(|(id, _)| *id))
    }

    async fn insert_bundle(&self, name: &str, label: &str) -> Result<i64, RepoError> {
        let mut bundles = rw_write(&self.bundles, SOURCE, "insert_bundle");
        if let Some((id, _)) = bundles.get(name) {
            return Ok(*id);
        }
        let id = self.next_bundle_id.fetch_add(1, Ordering::Relaxed);
        bundles.insert(name.to_string(), (id, label.to_string()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey {
            site_id: 1,
            bundle_id: 1,
            session_id: "_global".to_string(),
            key_name: name.to_string(),
        }
    }

    fn entry(name: &str, value: &str, expire: Option<OffsetDateTime>) -> CacheEntry {
        CacheEntry {
            key: key(name),
            label: name.to_string(),
            value: value.to_string(),
            created: datetime!(2024-01-01 0:00 UTC),
            expire,
        }
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_and_prunable() {
        let repo = MemoryRepository::new();
        let now = datetime!(2024-01-01 1:00 UTC);
        repo.insert_key(&entry("old", "1", Some(datetime!(2024-01-01 0:30 UTC))))
            .await
            .unwrap();
        repo.insert_key(&entry("live", "2", None)).await.unwrap();

        assert_eq!(repo.get_key(&key("old"), now).await.unwrap(), None);
        assert_eq!(
            repo.get_key(&key("live"), now).await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(repo.prune_expired(now).await.unwrap(), 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn regex_delete_touches_only_matches() {
        let repo = MemoryRepository::new();
        for name in ["foo_1", "foo_2", "bar_1"] {
            repo.insert_key(&entry(name, "x", None)).await.unwrap();
        }
        let filter = KeyFilter {
            site_id: 1,
            bundle_id: Some(1),
            session_id: None,
            key: KeyMatch::Regex("^foo_".to_string()),
            created_before: None,
        };
        assert_eq!(repo.delete_matching_keys(&filter).await.unwrap(), 2);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn grace_period_spares_recent_keys() {
        let repo = MemoryRepository::new();
        repo.insert_key(&entry("fresh", "x", None)).await.unwrap();
        let filter = KeyFilter {
            site_id: 1,
            bundle_id: None,
            session_id: None,
            key: KeyMatch::All,
            created_before: Some(datetime!(2024-01-01 0:00 UTC)),
        };
        assert_eq!(repo.delete_matching_keys(&filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bundles_resolve_and_insert_idempotently() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.get_bundle_id("default").await.unwrap(), Some(1));
        let id = repo.insert_bundle("pages", "Pages").await.unwrap();
        assert_eq!(repo.insert_bundle("pages", "Pages").await.unwrap(), id);
        assert_eq!(repo.get_bundle_id("pages").await.unwrap(), Some(id));
    }
}

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{RepoError, StoredKey, VariablesRepo},
    cache::{CacheEntry, CacheKey, KeyFilter, KeyMatch},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct StoredKeyRow {
    key_name: String,
    parameters: String,
    created: OffsetDateTime,
}

impl From<StoredKeyRow> for StoredKey {
    fn from(row: StoredKeyRow) -> Self {
        Self {
            key_name: row.key_name,
            value: row.parameters,
            created: row.created,
        }
    }
}

impl PostgresRepositories {
    fn apply_key_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q KeyFilter) {
        qb.push(" WHERE site_id = ");
        qb.push_bind(filter.site_id);

        if let Some(bundle_id) = filter.bundle_id {
            qb.push(" AND bundle_id = ");
            qb.push_bind(bundle_id);
        }
        if let Some(session_id) = filter.session_id.as_ref() {
            qb.push(" AND session_id = ");
            qb.push_bind(session_id);
        }
        match &filter.key {
            KeyMatch::Exact(name) => {
                qb.push(" AND key_name = ");
                qb.push_bind(name);
            }
            KeyMatch::Regex(pattern) => {
                qb.push(" AND key_name ~ ");
                qb.push_bind(pattern);
            }
            KeyMatch::All => {}
        }
        if let Some(cutoff) = filter.created_before {
            qb.push(" AND created < ");
            qb.push_bind(cutoff);
        }
    }
}

#[async_trait]
impl VariablesRepo for PostgresRepositories {
    async fn get_key(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT parameters
            FROM stash
            WHERE key_name = $1
              AND bundle_id = $2
              AND session_id = $3
              AND site_id = $4
              AND (expire IS NULL OR expire > $5)
            LIMIT 1
            "#,
        )
        .bind(&key.key_name)
        .bind(key.bundle_id)
        .bind(&key.session_id)
        .bind(key.site_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_key(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO stash
                (site_id, session_id, bundle_id, key_name, key_label, created, expire, parameters)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ON CONSTRAINT stash_identity DO UPDATE
            SET parameters = EXCLUDED.parameters,
                key_label = EXCLUDED.key_label,
                created = EXCLUDED.created,
                expire = EXCLUDED.expire
            "#,
        )
        .bind(entry.key.site_id)
        .bind(&entry.key.session_id)
        .bind(entry.key.bundle_id)
        .bind(&entry.key.key_name)
        .bind(&entry.label)
        .bind(entry.created)
        .bind(entry.expire)
        .bind(&entry.value)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_key(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE stash
            SET parameters = $1, created = $2, expire = $3
            WHERE key_name = $4 AND bundle_id = $5 AND session_id = $6 AND site_id = $7
            "#,
        )
        .bind(&entry.value)
        .bind(entry.created)
        .bind(entry.expire)
        .bind(&entry.key.key_name)
        .bind(entry.key.bundle_id)
        .bind(&entry.key.session_id)
        .bind(entry.key.site_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete_key(&self, key: &CacheKey) -> Result<u64, RepoError> {
        let result = sqlx::query(
            r#"
            DELETE FROM stash
            WHERE key_name = $1 AND bundle_id = $2 AND session_id = $3 AND site_id = $4
            "#,
        )
        .bind(&key.key_name)
        .bind(key.bundle_id)
        .bind(&key.session_id)
        .bind(key.site_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_matching_keys(&self, filter: &KeyFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM stash");
        Self::apply_key_filter(&mut qb, filter);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn list_keys(
        &self,
        filter: &KeyFilter,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredKey>, RepoError> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT key_name, parameters, created FROM stash");
        Self::apply_key_filter(&mut qb, filter);
        qb.push(" AND (expire IS NULL OR expire > ");
        qb.push_bind(now);
        qb.push(") ORDER BY created ASC, id ASC");

        let rows = qb
            .build_query_as::<StoredKeyRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(StoredKey::from).collect())
    }

    async fn prune_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM stash WHERE expire IS NOT NULL AND expire <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn flush_cache(&self, site_id: Option<i64>) -> Result<u64, RepoError> {
        let result = match site_id {
            Some(site_id) => {
                sqlx::query("DELETE FROM stash WHERE site_id = $1")
                    .bind(site_id)
                    .execute(self.pool())
                    .await
            }
            None => sqlx::query("DELETE FROM stash").execute(self.pool()).await,
        }
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn get_bundle_id(&self, name: &str) -> Result<Option<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM stash_bundles WHERE bundle_name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_bundle(&self, name: &str, label: &str) -> Result<i64, RepoError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO stash_bundles (bundle_name, bundle_label)
            VALUES ($1, $2)
            ON CONFLICT (bundle_name) DO UPDATE SET bundle_name = EXCLUDED.bundle_name
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(label)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}

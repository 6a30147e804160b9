//! Tiered variable store.
//!
//! Reads walk four tiers and stop at the first hit:
//!
//! 1. request memory under the name as written,
//! 2. request memory under the context-resolved name,
//! 3. the in-memory bundle named by the tag, if any,
//! 4. the persistent gateway, for non-local scopes.
//!
//! A persistent hit is promoted into memory. Misses fall back to request
//! data, then template files, then the tag's default; fallback values are
//! written back unless the read serves an append or prepend.

mod fallback;
mod options;

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};

use crate::application::error::AppError;
use crate::application::repos::{StoredKey, VariablesRepo};
use crate::application::request::RequestContext;
use crate::cache::{CacheConfig, CacheEntry, CacheKey, KeyFilter, KeyMatch, qualifier};
use crate::domain::pattern::Pattern;
use crate::domain::types::{Scope, VarType};

pub use options::{DestroyOptions, GetOptions, MatchGate, SetOptions};
pub(crate) use options::name_param;

#[derive(Clone)]
pub struct VariableStore {
    config: Arc<CacheConfig>,
    repo: Arc<dyn VariablesRepo>,
}

impl VariableStore {
    pub fn new(config: Arc<CacheConfig>, repo: Arc<dyn VariablesRepo>) -> Self {
        Self { config, repo }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn repo(&self) -> &Arc<dyn VariablesRepo> {
        &self.repo
    }

    /// Read a variable, falling back as configured. Misses resolve to an
    /// empty string.
    #[instrument(skip_all, fields(name = %opts.name, scope = %opts.scope))]
    pub async fn get(&self, ctx: &mut RequestContext, opts: &GetOptions) -> Result<String, AppError> {
        let value = match self.lookup(ctx, opts).await? {
            Some(value) => value,
            None => {
                counter!("stash_miss_total").increment(1);
                let fallback = self.fallback(ctx, opts).await?;
                if let Some(value) = fallback.as_deref()
                    && !opts.update
                    && !value.is_empty()
                {
                    self.set(ctx, &opts.write_back(), value.to_string()).await?;
                }
                fallback.unwrap_or_default()
            }
        };

        match &opts.gate {
            Some(gate) if !gate.passes(&value) => {
                debug!("match gate rejected value");
                Ok(opts.default.clone().unwrap_or_default())
            }
            _ => Ok(value),
        }
    }

    /// Tier walk without fallbacks.
    pub(crate) async fn lookup(
        &self,
        ctx: &mut RequestContext,
        opts: &GetOptions,
    ) -> Result<Option<String>, AppError> {
        if let Some(value) = pooled(ctx, opts.var_type, &opts.name) {
            counter!("stash_tier_hit_total", "tier" => "memory").increment(1);
            return Ok(Some(value.to_string()));
        }

        let resolved = ctx.resolve(&opts.name, &self.config);
        if let Some(value) = pooled(ctx, opts.var_type, &resolved) {
            counter!("stash_tier_hit_total", "tier" => "context").increment(1);
            return Ok(Some(value.to_string()));
        }

        if let Some(bundle) = opts.bundle.as_deref()
            && let Some(value) = ctx.bundle_value(bundle, &resolved)
        {
            counter!("stash_tier_hit_total", "tier" => "bundle").increment(1);
            return Ok(Some(value.to_string()));
        }

        if !opts.scope.is_persistable() {
            return Ok(None);
        }
        let bundle = opts.bundle.as_deref().unwrap_or(&self.config.default_bundle);
        let Some(bundle_id) = self.bundle_id(ctx, bundle, false).await? else {
            return Ok(None);
        };
        let Some(key) = CacheKey::for_scope(
            opts.scope,
            ctx.session_id(),
            ctx.info.site_id,
            bundle_id,
            resolved.clone(),
        ) else {
            return Ok(None);
        };

        let Some(value) = self.repo.get_key(&key, ctx.info.now).await? else {
            return Ok(None);
        };
        counter!("stash_tier_hit_total", "tier" => "persistent").increment(1);
        debug!(key = %resolved, "promoted persisted value");
        match opts.var_type {
            VarType::Variable => ctx.promote_var(&resolved, &value),
            VarType::Snippet => ctx.promote_snippet(&resolved, &value),
        }
        Ok(Some(value))
    }

    async fn fallback(
        &self,
        ctx: &RequestContext,
        opts: &GetOptions,
    ) -> Result<Option<String>, AppError> {
        if opts.dynamic
            && let Some(value) = fallback::dynamic_value(&ctx.info, &opts.name)
        {
            debug!("dynamic fallback hit");
            return Ok(Some(value));
        }
        if opts.file {
            let value =
                fallback::file_value(&self.config, &opts.name, opts.file_name.as_deref()).await?;
            return Ok(Some(value));
        }
        Ok(opts.default.clone())
    }

    /// Write a variable. Returns the stored value, or `None` when the write
    /// was skipped.
    #[instrument(skip_all, fields(name = %opts.name, scope = %opts.scope))]
    pub async fn set(
        &self,
        ctx: &mut RequestContext,
        opts: &SetOptions,
        value: String,
    ) -> Result<Option<String>, AppError> {
        let mut value = value;
        if let Some(gate) = &opts.gate
            && !gate.passes(&value)
        {
            match &opts.default {
                Some(default) => value = default.clone(),
                None => {
                    debug!("match gate rejected value, nothing written");
                    return Ok(None);
                }
            }
        }

        let resolved = ctx.resolve(&opts.name, &self.config);

        if opts.mode.is_update() {
            let current = self
                .lookup(ctx, &GetOptions::restricted(opts))
                .await?
                .unwrap_or_default();
            value = opts.mode.combine(&current, &value);
        }

        if opts.not_empty && value.trim().is_empty() {
            debug!("empty value skipped");
            return Ok(None);
        }

        if !opts.replace
            && !(opts.mode.is_update() && ctx.was_created(&resolved))
            && self
                .lookup(ctx, &GetOptions::restricted(opts))
                .await?
                .is_some()
        {
            debug!("existing value kept");
            return Ok(None);
        }

        let created_earlier = ctx.was_created(&resolved);
        match opts.var_type {
            VarType::Variable => ctx.set_var(resolved.clone(), value.clone()),
            VarType::Snippet => ctx.set_snippet(resolved.clone(), value.clone()),
        }
        if let Some(bundle) = opts.bundle.as_deref() {
            ctx.set_bundle_value(bundle, &resolved, &value);
        }

        if opts.scope.is_persistable() && opts.save {
            if ctx.is_human() {
                self.persist(ctx, opts, &resolved, &value, created_earlier)
                    .await?;
            } else {
                debug!("non-human visitor, persistence skipped");
            }
        }

        Ok(Some(value))
    }

    /// Persist `value` under the literal `opts.name`, bypassing request
    /// memory.
    pub(crate) async fn persist_raw(
        &self,
        ctx: &mut RequestContext,
        opts: &SetOptions,
        value: &str,
    ) -> Result<(), AppError> {
        let created_earlier = ctx.was_created(&opts.name);
        self.persist(ctx, opts, &opts.name, value, created_earlier)
            .await
    }

    /// Identical persisted values are left alone unless the variable was
    /// created earlier in this request.
    async fn persist(
        &self,
        ctx: &mut RequestContext,
        opts: &SetOptions,
        resolved: &str,
        value: &str,
        created_earlier: bool,
    ) -> Result<(), AppError> {
        let bundle = opts.bundle.as_deref().unwrap_or(&self.config.default_bundle);
        let Some(bundle_id) = self.bundle_id(ctx, bundle, true).await? else {
            return Ok(());
        };
        let Some(key) = CacheKey::for_scope(
            opts.scope,
            ctx.session_id(),
            ctx.info.site_id,
            bundle_id,
            resolved,
        ) else {
            return Ok(());
        };

        let now = ctx.info.now;
        let existing = self.repo.get_key(&key, now).await?;
        if existing.as_deref() == Some(value) && !created_earlier {
            counter!("stash_persist_write_total", "op" => "skip").increment(1);
            debug!(key = %resolved, "persisted value unchanged");
            return Ok(());
        }

        let entry = CacheEntry {
            key,
            label: opts.label.clone().unwrap_or_else(|| resolved.to_string()),
            value: value.to_string(),
            created: now,
            expire: self.config.expiry(opts.refresh, now),
        };
        if existing.is_some() {
            self.repo.update_key(&entry).await?;
            counter!("stash_persist_write_total", "op" => "update").increment(1);
            debug!(key = %resolved, "persisted value updated");
        } else {
            self.repo.insert_key(&entry).await?;
            counter!("stash_persist_write_total", "op" => "insert").increment(1);
            debug!(key = %resolved, "persisted value inserted");
        }
        Ok(())
    }

    /// Remove matching variables from memory and, when asked, from the
    /// persistent tier. Returns the number of persisted rows deleted.
    #[instrument(skip_all, fields(scope = %opts.scope))]
    pub async fn destroy(
        &self,
        ctx: &mut RequestContext,
        opts: &DestroyOptions,
    ) -> Result<u64, AppError> {
        let pattern = match &opts.pattern {
            Pattern::Exact(name) => Pattern::Exact(ctx.resolve(name, &self.config)),
            regex => regex.clone(),
        };

        let names = match opts.var_type {
            VarType::Variable => ctx.var_names(),
            VarType::Snippet => ctx.snippet_names(),
        };
        for name in names.iter().filter(|name| pattern.matches(name)) {
            match opts.var_type {
                VarType::Variable => ctx.remove_var(name),
                VarType::Snippet => ctx.remove_snippet(name),
            };
        }

        if !opts.flush_cache || !opts.scope.is_persistable() {
            return Ok(0);
        }

        let bundle_id = match opts.bundle.as_deref() {
            Some(bundle) => match self.bundle_id(ctx, bundle, false).await? {
                Some(id) => Some(id),
                None => return Ok(0),
            },
            None => None,
        };
        let cutoff = self.config.invalidation_cutoff(ctx.info.now);

        let deleted = match (&pattern, bundle_id, cutoff) {
            (Pattern::Exact(name), Some(bundle_id), None) => {
                let Some(key) = CacheKey::for_scope(
                    opts.scope,
                    ctx.session_id(),
                    ctx.info.site_id,
                    bundle_id,
                    name.clone(),
                ) else {
                    return Ok(0);
                };
                self.repo.delete_key(&key).await?
            }
            _ => {
                let filter = KeyFilter {
                    site_id: ctx.info.site_id,
                    bundle_id,
                    session_id: qualifier(opts.scope, ctx.session_id()),
                    key: KeyMatch::from_pattern(&pattern),
                    created_before: cutoff,
                };
                self.repo.delete_matching_keys(&filter).await?
            }
        };
        counter!("stash_persist_write_total", "op" => "delete").increment(deleted);
        debug!(deleted, "persisted keys destroyed");
        Ok(deleted)
    }

    /// Bundle id for `name`, cached per request. With `create` a missing
    /// bundle is inserted.
    pub(crate) async fn bundle_id(
        &self,
        ctx: &mut RequestContext,
        name: &str,
        create: bool,
    ) -> Result<Option<i64>, AppError> {
        if let Some(id) = ctx.cached_bundle_id(name) {
            return Ok(Some(id));
        }
        let id = match self.repo.get_bundle_id(name).await? {
            Some(id) => Some(id),
            None if create => Some(self.repo.insert_bundle(name, name).await?),
            None => None,
        };
        if let Some(id) = id {
            ctx.cache_bundle_id(name, id);
        }
        Ok(id)
    }

    /// Persisted entries of `bundle` whose names match `key`, oldest first.
    pub(crate) async fn list_persisted(
        &self,
        ctx: &mut RequestContext,
        scope: Scope,
        bundle: &str,
        key: KeyMatch,
    ) -> Result<Vec<StoredKey>, AppError> {
        let Some(bundle_id) = self.bundle_id(ctx, bundle, false).await? else {
            return Ok(Vec::new());
        };
        let Some(session_id) = qualifier(scope, ctx.session_id()) else {
            return Ok(Vec::new());
        };
        let filter = KeyFilter {
            site_id: ctx.info.site_id,
            bundle_id: Some(bundle_id),
            session_id: Some(session_id),
            key,
            created_before: None,
        };
        Ok(self.repo.list_keys(&filter, ctx.info.now).await?)
    }
}

fn pooled<'a>(ctx: &'a RequestContext, var_type: VarType, name: &str) -> Option<&'a str> {
    match var_type {
        VarType::Variable => ctx.var(name),
        VarType::Snippet => ctx.snippet(name),
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::application::request::RequestInfo;
    use crate::application::session::Session;
    use crate::domain::types::WriteMode;
    use crate::infra::memory::MemoryRepository;

    fn store() -> (VariableStore, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let store = VariableStore::new(Arc::new(CacheConfig::default()), repo.clone());
        (store, repo)
    }

    fn context(session: &str) -> RequestContext {
        let mut minted = Session::mint(OffsetDateTime::now_utc());
        minted.id = session.to_string();
        RequestContext::new(RequestInfo::new(1), minted, true)
    }

    #[tokio::test]
    async fn persisted_values_are_promoted() {
        let (store, repo) = store();
        let mut writer = context("a".repeat(32).as_str());
        let opts = SetOptions::new("title", store.config()).with_scope(Scope::Site).with_save(true);
        store.set(&mut writer, &opts, "Hello".into()).await.unwrap();
        assert_eq!(repo.len(), 1);

        let mut reader = context("b".repeat(32).as_str());
        let mut get = GetOptions::new("title", store.config());
        get.scope = Scope::Site;
        assert_eq!(store.get(&mut reader, &get).await.unwrap(), "Hello");
        assert_eq!(reader.var("title"), Some("Hello"));
        assert!(!reader.was_created("title"));
    }

    #[tokio::test]
    async fn unchanged_values_keep_their_original_row() {
        let (store, repo) = store();
        let opts = SetOptions::new("title", store.config()).with_scope(Scope::Site).with_save(true);
        let key = CacheKey::for_scope(Scope::Site, "", 1, 1, "title").unwrap();

        let mut first = context("a");
        store.set(&mut first, &opts, "Hello".into()).await.unwrap();
        let written = repo.created(&key).unwrap();

        let mut second = context("b");
        second.info.now = written + time::Duration::minutes(5);
        store.set(&mut second, &opts, "Hello".into()).await.unwrap();
        assert_eq!(repo.created(&key), Some(written));

        store.set(&mut second, &opts, "Changed".into()).await.unwrap();
        assert_eq!(repo.created(&key), Some(second.info.now));
    }

    #[tokio::test]
    async fn local_scope_never_persists() {
        let (store, repo) = store();
        let mut ctx = context("a");
        let opts = SetOptions::new("x", store.config()).with_scope(Scope::Local).with_save(true);
        store.set(&mut ctx, &opts, "1".into()).await.unwrap();
        assert!(repo.is_empty());
        assert_eq!(ctx.var("x"), Some("1"));
    }

    #[tokio::test]
    async fn replace_no_keeps_existing_value() {
        let (store, _) = store();
        let mut ctx = context("a");
        let opts = SetOptions::new("x", store.config());
        store.set(&mut ctx, &opts, "first".into()).await.unwrap();

        let mut keep = opts.clone();
        keep.replace = false;
        assert_eq!(store.set(&mut ctx, &keep, "second".into()).await.unwrap(), None);
        assert_eq!(ctx.var("x"), Some("first"));

        let append = keep.with_mode(WriteMode::Append);
        store.set(&mut ctx, &append, "+".into()).await.unwrap();
        assert_eq!(ctx.var("x"), Some("first+"));
    }

    #[tokio::test]
    async fn gate_failure_writes_default_or_nothing() {
        let (store, _) = store();
        let mut ctx = context("a");
        let mut opts = SetOptions::new("n", store.config());
        opts.gate = Some(MatchGate {
            regex: Pattern::parse_regex("#^\\d+$#").unwrap(),
            against: None,
        });
        assert_eq!(store.set(&mut ctx, &opts, "abc".into()).await.unwrap(), None);
        assert!(!ctx.has_var("n"));

        opts.default = Some("0".into());
        assert_eq!(
            store.set(&mut ctx, &opts, "abc".into()).await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn defaults_are_written_back() {
        let (store, _) = store();
        let mut ctx = context("a");
        let mut opts = GetOptions::new("missing", store.config());
        opts.default = Some("fallback".into());
        assert_eq!(store.get(&mut ctx, &opts).await.unwrap(), "fallback");
        assert_eq!(ctx.var("missing"), Some("fallback"));
    }

    #[tokio::test]
    async fn bots_read_but_never_write() {
        let (store, repo) = store();
        let mut ctx = RequestContext::new(
            RequestInfo::new(1),
            Session::mint(OffsetDateTime::now_utc()),
            false,
        );
        let opts = SetOptions::new("x", store.config()).with_scope(Scope::Site).with_save(true);
        store.set(&mut ctx, &opts, "1".into()).await.unwrap();
        assert!(repo.is_empty());
        assert_eq!(ctx.var("x"), Some("1"));
    }
}

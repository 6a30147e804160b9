//! Variable, bundle and caching verbs.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::application::engine::Stash;
use crate::application::error::AppError;
use crate::application::expander::{ExpandOptions, strip_nocache_markers};
use crate::application::host::TemplateHost;
use crate::application::request::RequestContext;
use crate::application::scheduler::CAPTURE_PRIORITY;
use crate::application::store::{DestroyOptions, GetOptions, SetOptions, name_param};
use crate::application::tag::Tag;
use crate::application::verb::Verb;
use crate::cache::KeyMatch;
use crate::domain::context::PAGE_TOKEN;
use crate::domain::list::{Row, rows_from_tag_pairs};
use crate::domain::slug::page_directory;
use crate::domain::types::{ProcessStage, Scope, VarType, WriteMode};
use crate::infra::error::InfraError;

pub(crate) const TEMPLATE_BUNDLE: &str = "template";
pub(crate) const STATIC_BUNDLE: &str = "static";
const CAPTURE_PREFIX: &str = "stash:";
const DEFAULT_CACHE_NAME: &str = "cache";
const DEFAULT_STATIC_NAME: &str = "static";
const STATIC_INDEX_FILE: &str = "index.html";

impl Stash {
    pub(crate) async fn get(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let opts = GetOptions::from_tag(tag, &self.config)?;
        let value = self.store.get(ctx, &opts).await?;
        let value = self.post_process(ctx, host, tag, value, false, depth).await?;
        Ok(if tag.flag("output", true) { value } else { String::new() })
    }

    /// Input of a set-style verb: the tag body for pairs, else `value`.
    /// Expanded when any `parse_*` flag asks for it.
    async fn input(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        use_body: bool,
        depth: usize,
    ) -> Result<String, AppError> {
        let raw = match (&tag.body, use_body) {
            (Some(body), true) => body.clone(),
            _ => tag.raw_param("value").unwrap_or_default().to_string(),
        };
        self.post_process(ctx, host, tag, raw, false, depth).await
    }

    pub(crate) async fn post_process(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        value: String,
        default: bool,
        depth: usize,
    ) -> Result<String, AppError> {
        let opts = ExpandOptions::from_tag(tag, &self.config, default)?;
        if !opts.is_any() || value.is_empty() {
            return Ok(value);
        }
        self.expand(ctx, host, &value, opts, depth).await
    }

    pub(crate) async fn write(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        mode: WriteMode,
        use_body: bool,
        depth: usize,
    ) -> Result<String, AppError> {
        let value = self.input(ctx, host, tag, use_body, depth).await?;

        // A nameless pair captures each `{stash:x}…{/stash:x}` in its body.
        if use_body && !tag.has("name") && tag.body.is_some() {
            for row in rows_from_tag_pairs(&value) {
                for (key, captured) in row.iter() {
                    let Some(name) = key.strip_prefix(CAPTURE_PREFIX) else {
                        continue;
                    };
                    let opts = SetOptions::from_tag_named(tag, &self.config, mode, name.to_string())?;
                    self.store.set(ctx, &opts, captured.to_string()).await?;
                }
            }
            return Ok(String::new());
        }

        let opts = SetOptions::from_tag(tag, &self.config, mode)?;
        let written = self.store.set(ctx, &opts, value).await?;
        Ok(match written {
            Some(value) if tag.flag("output", false) => value,
            _ => String::new(),
        })
    }

    pub(crate) async fn copy(&self, ctx: &mut RequestContext, tag: &Tag) -> Result<String, AppError> {
        let get = GetOptions::from_tag(tag, &self.config)?;
        let value = self.store.get(ctx, &get).await?;

        let target = name_param(tag, "copy_name")?;
        let mut set = SetOptions::from_tag_named(tag, &self.config, WriteMode::Replace, target)?;
        set.gate = None;
        if let Some(scope) = tag.typed::<Scope>("copy_scope")? {
            set.scope = scope;
        }
        if let Some(var_type) = tag.typed::<VarType>("copy_type")? {
            set.var_type = var_type;
        }
        if let Some(bundle) = tag.get("copy_bundle") {
            set.bundle = Some(bundle.to_string());
        }

        let written = self.store.set(ctx, &set, value).await?;
        Ok(match written {
            Some(value) if tag.flag("output", false) => value,
            _ => String::new(),
        })
    }

    pub(crate) async fn destroy(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let opts = DestroyOptions::from_tag(tag, &self.config)?;
        self.store.destroy(ctx, &opts).await?;
        Ok(String::new())
    }

    pub(crate) fn context(&self, ctx: &mut RequestContext, tag: &Tag) -> Result<String, AppError> {
        let name = tag
            .get("name")
            .ok_or_else(|| AppError::validation("`name` parameter is required"))?;
        ctx.set_current_context(name);
        debug!(context = name, "current context set");
        Ok(String::new())
    }

    /// `not_empty` / `is_empty`: `"1"` when the variable's emptiness matches.
    pub(crate) async fn emptiness(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
        want_empty: bool,
    ) -> Result<String, AppError> {
        let opts = GetOptions::from_tag(tag, &self.config)?;
        let value = self.store.get(ctx, &opts).await?;
        let is_empty = value.trim().is_empty();
        Ok(if is_empty == want_empty { "1" } else { "0" }.to_string())
    }

    /// Open an in-memory bundle, run the body that fills it and optionally
    /// persist it.
    pub(crate) async fn bundle(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let name = name_param(tag, "name")?;
        ctx.open_bundle(&name);
        let output = self
            .post_process(ctx, host, tag, tag.body().to_string(), true, depth)
            .await?;
        if tag.flag("save", false) {
            self.set_bundle(ctx, tag).await?;
        }
        Ok(if tag.flag("output", false) { output } else { String::new() })
    }

    /// Persist an in-memory bundle as one JSON entry in the bundle partition
    /// of the same name. Non-unique bundles get numbered keys.
    pub(crate) async fn set_bundle(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let name = name_param(tag, "name")?;
        let Some(row) = ctx.bundle(&name).cloned() else {
            debug!(bundle = %name, "bundle not open, nothing saved");
            return Ok(String::new());
        };
        if row.is_empty() {
            return Ok(String::new());
        }
        let scope = tag.typed::<Scope>("scope")?.unwrap_or(Scope::Site);
        let value = serde_json::to_string(&row)
            .map_err(|err| AppError::unexpected(format!("failed to encode bundle: {err}")))?;

        let key_name = if tag.flag("unique", true) {
            name.clone()
        } else {
            let pattern = format!("^{}_\\d+$", regex::escape(&name));
            let existing = self
                .store
                .list_persisted(ctx, scope, &name, KeyMatch::Regex(pattern))
                .await?;
            format!("{name}_{}", existing.len() + 1)
        };

        let mut opts = SetOptions::new(key_name, &self.config)
            .with_scope(scope)
            .with_bundle(name.clone())
            .with_save(true);
        opts.refresh = tag.u64("refresh")?;
        opts.label = tag.get("label").map(str::to_string);

        if !ctx.is_human() {
            debug!(bundle = %name, "non-human visitor, bundle not persisted");
            return Ok(String::new());
        }
        self.store.persist_raw(ctx, &opts, &value).await?;
        Ok(String::new())
    }

    /// Read persisted bundle entries. With a body each entry is rendered
    /// through it; without one the newest entry is loaded into memory.
    pub(crate) async fn get_bundle(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let name = name_param(tag, "name")?;
        let scope = tag.typed::<Scope>("scope")?.unwrap_or(Scope::Site);
        let entries = self
            .store
            .list_persisted(ctx, scope, &name, KeyMatch::All)
            .await?;
        let mut rows: Vec<Row> = entries
            .iter()
            .filter_map(|entry| serde_json::from_str::<Row>(&entry.value).ok())
            .collect();
        if let Some(limit) = tag.usize("limit")? {
            rows.truncate(limit);
        }

        if tag.body.is_none() {
            if let Some(row) = rows.last() {
                for (key, value) in row.iter() {
                    ctx.set_var(key, value);
                    ctx.set_bundle_value(&name, key, value);
                }
            }
            return Ok(String::new());
        }

        let total = rows.len().to_string();
        for (index, row) in rows.iter_mut().enumerate() {
            row.set("count", (index + 1).to_string());
            row.set("total_results", total.clone());
        }
        let rendered = host.parse_variables(tag.body(), &rows);
        self.post_process(ctx, host, tag, rendered, false, depth).await
    }

    /// Fetch a template by name, falling back to the template files, and
    /// expand it. `process="start"` returns it unexpanded for the host to
    /// parse with the surrounding template.
    pub(crate) async fn embed(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        stage: ProcessStage,
        depth: usize,
    ) -> Result<String, AppError> {
        let mut opts = GetOptions::from_tag(tag, &self.config)?;
        opts.file = true;
        opts.scope = Scope::Site;
        opts.bundle = Some(tag.get_or("bundle", TEMPLATE_BUNDLE).to_string());
        opts.save = tag.flag("save", true);

        let template = self.store.get(ctx, &opts).await?;
        if stage == ProcessStage::Start {
            return Ok(template);
        }
        let expand = ExpandOptions {
            tags: true,
            vars: true,
            conditionals: true,
            passes: tag.usize("parse_depth")?.unwrap_or(self.config.parse_depth),
        };
        self.expand(ctx, host, &template, expand, depth).await
    }

    /// Page-keyed fragment cache.
    pub(crate) async fn cache(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        stage: ProcessStage,
        depth: usize,
    ) -> Result<String, AppError> {
        let name = format!("{PAGE_TOKEN}{}", tag.get_or("name", DEFAULT_CACHE_NAME));
        let bundle = tag.get_or("bundle", TEMPLATE_BUNDLE).to_string();

        let mut lookup = GetOptions::new(name.clone(), &self.config);
        lookup.scope = Scope::Site;
        lookup.bundle = Some(bundle.clone());
        if let Some(cached) = self.store.lookup(ctx, &lookup).await?
            && !cached.is_empty()
        {
            debug!(key = %name, "cache hit");
            return Ok(cached);
        }

        if stage.is_deferred() {
            let mut capture = tag.clone();
            capture.body = None;
            capture.set_param("name", name);
            capture.set_param("bundle", bundle);
            let priority = tag.i64("priority")?.unwrap_or(CAPTURE_PRIORITY);
            let placeholder = ctx.deferred.register(Verb::SaveOutput, capture, priority)?;
            return Ok(format!("{placeholder}{}", tag.body()));
        }

        let output = self
            .post_process(ctx, host, tag, tag.body().to_string(), true, depth)
            .await?;
        let mut save = tag.clone();
        save.body = Some(output);
        save.set_param("name", name);
        save.set_param("bundle", bundle);
        self.save_output(ctx, &save).await
    }

    /// Persist the tag body under its name and return it unchanged.
    pub(crate) async fn save_output(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let page = tag.body().to_string();
        let name = tag
            .get("name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{PAGE_TOKEN}{DEFAULT_CACHE_NAME}"));
        let mut opts = SetOptions::new(name, &self.config)
            .with_scope(Scope::Site)
            .with_bundle(tag.get_or("bundle", TEMPLATE_BUNDLE))
            .with_save(true);
        opts.refresh = tag.u64("refresh")?;
        self.store.set(ctx, &opts, page.clone()).await?;
        Ok(page)
    }

    /// Full-page capture that also writes a static file when configured.
    pub(crate) async fn static_cache(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let mut save = tag.clone();
        save.set_param(
            "name",
            format!("{PAGE_TOKEN}{}", tag.get_or("name", DEFAULT_STATIC_NAME)),
        );
        save.set_param("bundle", STATIC_BUNDLE);
        let page = self.save_output(ctx, &save).await?;

        if let Some(dir) = self.config.static_cache_dir.as_ref() {
            let path = self.static_path(ctx, dir)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| InfraError::static_write(&path, err))?;
            }
            tokio::fs::write(&path, strip_nocache_markers(&page))
                .await
                .map_err(|err| InfraError::static_write(&path, err))?;
            info!(path = %path.display(), "static page written");
        }
        Ok(page)
    }

    fn static_path(&self, ctx: &RequestContext, dir: &std::path::Path) -> Result<PathBuf, AppError> {
        let page = page_directory(ctx.page_key(&self.config), &self.config.uri_index)?;
        let mut path = dir.join(ctx.info.site_id.to_string());
        if !page.is_empty() {
            path.push(page);
        }
        path.push(STATIC_INDEX_FILE);
        Ok(path)
    }

    pub(crate) async fn parse(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let opts = ExpandOptions::from_tag(tag, &self.config, true)?;
        self.expand(ctx, host, tag.body(), opts, depth).await
    }

    pub(crate) async fn flush_cache(&self, ctx: &mut RequestContext) -> Result<String, AppError> {
        if ctx.info.member.group_id != self.config.admin_group_id {
            return Err(AppError::Unauthorized {
                action: "flush the cache",
            });
        }
        let deleted = self
            .store
            .repo()
            .flush_cache(Some(ctx.info.site_id))
            .await?;
        info!(deleted, site_id = ctx.info.site_id, "persistent cache flushed");
        Ok(String::new())
    }
}

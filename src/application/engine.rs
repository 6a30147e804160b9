//! The `Stash` engine: request setup, verb dispatch and deferred replay.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::application::error::AppError;
use crate::application::expander::{ExpandOptions, Expander, strip_nocache_markers};
use crate::application::host::{ParseHook, TemplateHost};
use crate::application::repos::VariablesRepo;
use crate::application::request::{RequestContext, RequestInfo};
use crate::application::scheduler::{CAPTURE_PRIORITY, DEFAULT_PRIORITY};
use crate::application::session::{Session, should_prune};
use crate::application::store::VariableStore;
use crate::application::tag::Tag;
use crate::application::verb::Verb;
use crate::cache::CacheConfig;
use crate::domain::types::{ProcessStage, WriteMode};

/// Shared engine. One instance serves every request; per-request state
/// lives in the [`RequestContext`] returned by [`Stash::begin_request`].
#[derive(Clone)]
pub struct Stash {
    pub(crate) config: Arc<CacheConfig>,
    pub(crate) store: VariableStore,
    hook: Option<Arc<dyn ParseHook>>,
}

impl Stash {
    pub fn new(config: CacheConfig, repo: Arc<dyn VariablesRepo>) -> Self {
        let config = Arc::new(config);
        Self {
            store: VariableStore::new(config.clone(), repo),
            config,
            hook: None,
        }
    }

    pub fn with_parse_hook(mut self, hook: Arc<dyn ParseHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Establish the visitor's session and build the request context.
    ///
    /// Crawlers seen without a cookie are marked read-only when bot limiting
    /// is on. A stale session has its cookie reissued and may trigger an
    /// expiry sweep.
    #[instrument(skip_all, fields(site_id = info.site_id))]
    pub async fn begin_request(&self, info: RequestInfo) -> Result<RequestContext, AppError> {
        let config = &self.config;
        let now = info.now;
        let had_cookie = info.cookie.is_some();
        let mut session = Session::from_cookie(info.cookie.as_deref(), &config.cookie_secret, now);

        let is_human =
            !(config.limit_bots && !had_cookie && config.is_bot(info.user_agent.as_deref()));
        let stale = !session.minted && session.is_stale(config, now);
        if stale {
            session.refresh(now);
        }

        let set_cookie = (is_human && (session.minted || stale))
            .then(|| session.to_cookie(&config.cookie_secret));

        let prune = stale && should_prune(config, &mut rand::rng());
        if prune {
            match self.store.repo().prune_expired(now).await {
                Ok(pruned) => {
                    counter!("stash_prune_total", "source" => "gate").increment(1);
                    info!(pruned, "expired keys pruned");
                }
                Err(error) => warn!(error = %error, "expiry sweep failed"),
            }
        }

        debug!(is_human, minted = session.minted, stale, "request started");
        let mut ctx = RequestContext::new(info, session, is_human);
        ctx.set_cookie = set_cookie;
        Ok(ctx)
    }

    /// Run one tag. With `process="end"` the tag is queued and its
    /// placeholder returned instead.
    #[instrument(skip_all, fields(verb = %verb, depth = depth))]
    pub async fn call(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        verb: Verb,
        tag: Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        if depth > self.config.max_call_depth {
            return Err(AppError::RecursionLimit {
                limit: self.config.max_call_depth,
            });
        }

        let stage = ProcessStage::parse(tag.raw_param("process").unwrap_or_default())?;
        let stage = match verb {
            Verb::Embed => stage,
            _ => stage.normalize_for_body(),
        };
        let defer = match verb {
            Verb::StaticCache => true,
            Verb::Cache => false,
            _ => stage.is_deferred(),
        };

        if defer {
            let fallback = if verb.is_full_page() {
                CAPTURE_PRIORITY
            } else {
                DEFAULT_PRIORITY
            };
            let priority = tag.i64("priority")?.unwrap_or(fallback);
            let placeholder = ctx.deferred.register(verb, tag, priority)?;
            debug!(%placeholder, priority, "tag deferred");
            return Ok(placeholder);
        }

        self.run(ctx, host, verb, tag, stage, depth).await
    }

    /// Replay deferred tags into `template` and strip nocache markers.
    ///
    /// Entries run by ascending priority. One whose placeholder is missing
    /// stays queued; output of replayed tags may register further entries,
    /// which are picked up by the next round.
    #[instrument(skip_all, fields(pending = ctx.pending_deferrals()))]
    pub async fn finalize(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        template: String,
    ) -> Result<String, AppError> {
        let mut template = template;

        for round in 0..=self.config.max_call_depth {
            let mut replayed = 0usize;
            for placeholder in ctx.deferred.replay_order() {
                if !template.contains(&placeholder) {
                    debug!(%placeholder, "placeholder absent, entry kept");
                    continue;
                }
                let Some(entry) = ctx.deferred.take(&placeholder) else {
                    continue;
                };
                counter!("stash_deferred_replay_total").increment(1);
                debug!(verb = %entry.verb, priority = entry.priority, round, "replaying");

                if entry.verb.is_full_page() {
                    let page = template.replacen(&placeholder, "", 1);
                    let tag = entry.tag.with_body(page);
                    template = self
                        .run(ctx, host, entry.verb, tag, ProcessStage::Inline, 0)
                        .await?;
                } else {
                    let output = self
                        .run(ctx, host, entry.verb, entry.tag, ProcessStage::Inline, 0)
                        .await?;
                    template = template.replacen(&placeholder, &output, 1);
                }
                replayed += 1;
            }
            if replayed == 0 {
                break;
            }
        }

        Ok(strip_nocache_markers(&template))
    }

    /// Expand `body` with this engine's parse hook.
    pub async fn expand(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        body: &str,
        opts: ExpandOptions,
        depth: usize,
    ) -> Result<String, AppError> {
        let expander = Expander {
            config: &self.config,
            hook: self.hook.as_deref(),
        };
        expander.expand(ctx, host, body, opts, depth).await
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        verb: Verb,
        tag: Tag,
        stage: ProcessStage,
        depth: usize,
    ) -> Result<String, AppError> {
        match verb {
            Verb::Get => self.get(ctx, host, &tag, depth).await,
            Verb::Set => self.write(ctx, host, &tag, WriteMode::Replace, true, depth).await,
            Verb::Append => self.write(ctx, host, &tag, WriteMode::Append, true, depth).await,
            Verb::Prepend => self.write(ctx, host, &tag, WriteMode::Prepend, true, depth).await,
            Verb::SetValue => self.write(ctx, host, &tag, WriteMode::Replace, false, depth).await,
            Verb::AppendValue => self.write(ctx, host, &tag, WriteMode::Append, false, depth).await,
            Verb::PrependValue => {
                self.write(ctx, host, &tag, WriteMode::Prepend, false, depth)
                    .await
            }
            Verb::SetList => self.set_list(ctx, host, &tag, depth).await,
            Verb::GetList => self.get_list(ctx, host, &tag, depth).await,
            Verb::AppendList => self.extend_list(ctx, host, &tag, true, depth).await,
            Verb::PrependList => self.extend_list(ctx, host, &tag, false, depth).await,
            Verb::JoinLists => self.join_lists(ctx, &tag).await,
            Verb::SplitList => self.split_list(ctx, &tag).await,
            Verb::ListCount => self.list_count(ctx, &tag).await,
            Verb::Copy => self.copy(ctx, &tag).await,
            Verb::Destroy => self.destroy(ctx, &tag).await,
            Verb::Context => self.context(ctx, &tag),
            Verb::NotEmpty => self.emptiness(ctx, &tag, false).await,
            Verb::IsEmpty => self.emptiness(ctx, &tag, true).await,
            Verb::GetBundle => self.get_bundle(ctx, host, &tag, depth).await,
            Verb::SetBundle => self.set_bundle(ctx, &tag).await,
            Verb::Bundle => self.bundle(ctx, host, &tag, depth).await,
            Verb::Embed => self.embed(ctx, host, &tag, stage, depth).await,
            Verb::Cache => self.cache(ctx, host, &tag, stage, depth).await,
            Verb::StaticCache => self.static_cache(ctx, &tag).await,
            Verb::Parse => self.parse(ctx, host, &tag, depth).await,
            Verb::FlushCache => self.flush_cache(ctx).await,
            Verb::SaveOutput => self.save_output(ctx, &tag).await,
        }
    }
}

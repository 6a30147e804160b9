//! Per-request state.
//!
//! Everything a request accumulates (memory tier, snippet pool, bundle cache,
//! current context, tracked list values, deferred queue) lives here and is
//! passed explicitly as `&mut RequestContext`. Nothing is shared between
//! requests.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::OnceCell;
use time::OffsetDateTime;
use url::form_urlencoded;

use crate::application::scheduler::DeferredQueue;
use crate::application::session::Session;
use crate::cache::CacheConfig;
use crate::domain::context::{self, ResolveEnv};
use crate::domain::list::Row;

/// The logged-in member, if any. Guests have id 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub group_id: i64,
}

/// What the host knows about the incoming request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub site_id: i64,
    pub now: OffsetDateTime,
    pub user_agent: Option<String>,
    /// Raw value of the session cookie.
    pub cookie: Option<String>,
    pub segments: Vec<String>,
    pub query_string: Option<String>,
    pub query: BTreeMap<String, String>,
    pub post: BTreeMap<String, String>,
    pub member: Member,
}

impl RequestInfo {
    pub fn new(site_id: i64) -> Self {
        Self {
            site_id,
            now: OffsetDateTime::now_utc(),
            user_agent: None,
            cookie: None,
            segments: Vec::new(),
            query_string: None,
            query: BTreeMap::new(),
            post: BTreeMap::new(),
            member: Member::default(),
        }
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Split a request path into route segments and decoded query values.
    pub fn with_path(mut self, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        self.segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(query) = query {
            self.query_string = Some(query.to_string());
            self.query = form_urlencoded::parse(query.as_bytes())
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
        }
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.member = member;
        self
    }

    /// 1-based route segment, as template authors number them.
    pub fn segment(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.segments.get(i))
            .map(String::as_str)
    }
}

pub struct RequestContext {
    pub info: RequestInfo,
    pub(crate) session: Session,
    pub(crate) is_human: bool,
    pub(crate) set_cookie: Option<String>,
    current_context: String,
    page_key: OnceCell<String>,
    vars: HashMap<String, String>,
    snippets: HashMap<String, String>,
    created: HashSet<String>,
    bundles: HashMap<String, Row>,
    bundle_ids: HashMap<String, i64>,
    tracked: HashMap<String, HashSet<String>>,
    pub(crate) deferred: DeferredQueue,
}

impl RequestContext {
    pub(crate) fn new(info: RequestInfo, session: Session, is_human: bool) -> Self {
        Self {
            info,
            session,
            is_human,
            set_cookie: None,
            current_context: String::new(),
            page_key: OnceCell::new(),
            vars: HashMap::new(),
            snippets: HashMap::new(),
            created: HashSet::new(),
            bundles: HashMap::new(),
            bundle_ids: HashMap::new(),
            tracked: HashMap::new(),
            deferred: DeferredQueue::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Whether this visitor may write to the persistent tier.
    pub fn is_human(&self) -> bool {
        self.is_human
    }

    /// Cookie value the host should send back, when one was issued.
    pub fn outgoing_cookie(&self) -> Option<&str> {
        self.set_cookie.as_deref()
    }

    pub fn current_context(&self) -> &str {
        &self.current_context
    }

    pub fn set_current_context(&mut self, value: impl Into<String>) {
        self.current_context = value.into();
    }

    /// Current page key, computed once per request.
    pub fn page_key(&self, config: &CacheConfig) -> &str {
        self.page_key.get_or_init(|| {
            context::page_key(
                &self.info.segments,
                self.info.query_string.as_deref(),
                &config.uri_index,
                config.include_query_string,
            )
        })
    }

    /// Resolve `@:` / `@URI:` prefixes and the configured variable prefix.
    pub fn resolve(&self, name: &str, config: &CacheConfig) -> String {
        let page_key = if context::needs_page_key(name) {
            self.page_key(config)
        } else {
            ""
        };
        let env = ResolveEnv {
            context: &self.current_context,
            page_key,
            var_prefix: config.var_prefix.as_deref(),
        };
        context::resolve(name, &env)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Write to the memory tier, remembering names first created now.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.vars.contains_key(&name) {
            self.created.insert(name.clone());
        }
        self.vars.insert(name, value.into());
    }

    /// Copy a value read from a slower tier into memory. Promotion does not
    /// count as creating the variable.
    pub(crate) fn promote_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn remove_var(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    pub fn var_names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn was_created(&self, name: &str) -> bool {
        self.created.contains(name)
    }

    pub fn snippet(&self, name: &str) -> Option<&str> {
        self.snippets.get(name).map(String::as_str)
    }

    pub fn set_snippet(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.snippets.contains_key(&name) {
            self.created.insert(name.clone());
        }
        self.snippets.insert(name, value.into());
    }

    pub(crate) fn promote_snippet(&mut self, name: &str, value: &str) {
        self.snippets.insert(name.to_string(), value.to_string());
    }

    pub fn remove_snippet(&mut self, name: &str) -> Option<String> {
        self.snippets.remove(name)
    }

    pub fn snippet_names(&self) -> Vec<String> {
        self.snippets.keys().cloned().collect()
    }

    pub fn snippets(&self) -> &HashMap<String, String> {
        &self.snippets
    }

    pub fn bundle_value(&self, bundle: &str, name: &str) -> Option<&str> {
        self.bundles.get(bundle).and_then(|row| row.get(name))
    }

    pub fn set_bundle_value(&mut self, bundle: &str, name: &str, value: &str) {
        self.bundles
            .entry(bundle.to_string())
            .or_default()
            .set(name, value);
    }

    pub fn bundle(&self, bundle: &str) -> Option<&Row> {
        self.bundles.get(bundle)
    }

    /// Start an empty in-memory bundle, discarding any earlier contents.
    pub fn open_bundle(&mut self, bundle: &str) {
        self.bundles.insert(bundle.to_string(), Row::new());
    }

    pub(crate) fn cached_bundle_id(&self, name: &str) -> Option<i64> {
        self.bundle_ids.get(name).copied()
    }

    pub(crate) fn cache_bundle_id(&mut self, name: &str, id: i64) {
        self.bundle_ids.insert(name.to_string(), id);
    }

    /// Record rendered values of a list column for later `in`/`not_in`.
    pub fn track(&mut self, column: &str, values: impl IntoIterator<Item = String>) {
        self.tracked
            .entry(column.to_string())
            .or_default()
            .extend(values);
    }

    pub fn tracked(&self, column: &str) -> HashSet<String> {
        self.tracked.get(column).cloned().unwrap_or_default()
    }

    pub fn pending_deferrals(&self) -> usize {
        self.deferred.len()
    }
}

//! Bounded multi-pass macro expansion.
//!
//! Each pass protects `{stash:nocache}` regions, substitutes known values,
//! decides conditionals whose names are all known and, while nested tag
//! syntax remains, hands the text to the host for one round of execution.
//! After the last pass the remaining conditionals are decided with unknown
//! names as empty, protected regions are restored and the parse hook runs.

use std::fmt::Write;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Utc};

use metrics::histogram;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::trace;

use crate::application::error::AppError;
use crate::application::host::{ParseHook, TemplateHost};
use crate::application::request::RequestContext;
use crate::application::tag::Tag;
use crate::cache::CacheConfig;
use crate::domain::conditionals::{self, Resolution};

pub const NOCACHE_OPEN: &str = "{stash:nocache}";
pub const NOCACHE_CLOSE: &str = "{/stash:nocache}";
const NOCACHE_PLACEHOLDER: &str = "stash_nocache_";
const STASH_PREFIX: &str = "stash:";
const SESSION_TOKEN: &str = "stash:session_id";
const SEGMENT_PREFIX: &str = "segment_";

/// What an expansion does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    pub tags: bool,
    pub vars: bool,
    pub conditionals: bool,
    pub passes: usize,
}

impl ExpandOptions {
    /// Everything on, with the configured pass count.
    pub fn all(config: &CacheConfig) -> Self {
        Self {
            tags: true,
            vars: true,
            conditionals: true,
            passes: config.parse_depth,
        }
    }

    /// Read `parse_tags`, `parse_vars`, `parse_conditionals` and
    /// `parse_depth`, each flag defaulting to `default`.
    pub fn from_tag(tag: &Tag, config: &CacheConfig, default: bool) -> Result<Self, AppError> {
        Ok(Self {
            tags: tag.flag("parse_tags", default),
            vars: tag.flag("parse_vars", default),
            conditionals: tag.flag("parse_conditionals", default),
            passes: tag.usize("parse_depth")?.unwrap_or(config.parse_depth),
        })
    }

    pub fn is_any(&self) -> bool {
        self.tags || self.vars || self.conditionals
    }
}

pub(crate) struct Expander<'a> {
    pub config: &'a CacheConfig,
    pub hook: Option<&'a dyn ParseHook>,
}

impl Expander<'_> {
    pub async fn expand(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        body: &str,
        opts: ExpandOptions,
        depth: usize,
    ) -> Result<String, AppError> {
        let started = Instant::now();
        let mut protected = Vec::new();
        let mut text = body.to_string();

        for pass in 0..opts.passes.max(1) {
            text = protect(&text, &mut protected);
            if opts.vars {
                text = substitute(&text, ctx, self.config);
            }
            if opts.conditionals {
                text = conditionals::evaluate(&text, Resolution::KnownOnly, &|name: &str| {
                    known_value(ctx, self.config, name)
                });
            }
            if !(opts.tags && host.has_tags(&text)) {
                break;
            }
            trace!(pass, depth, "handing nested tags to the host");
            text = host.parse_tags(&text, ctx, depth + 1).await?;
        }

        if opts.conditionals {
            text = conditionals::evaluate(&text, Resolution::All, &|name: &str| {
                known_value(ctx, self.config, name)
            });
        }
        text = restore(text, &protected);
        if let Some(hook) = self.hook {
            text = hook.final_parse(text, ctx);
        }

        histogram!("stash_expand_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(text)
    }
}

/// Replace complete nocache regions, markers included, by numbered
/// placeholders.
fn protect(text: &str, protected: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(open_rel) = text[pos..].find(NOCACHE_OPEN) {
        let open = pos + open_rel;
        let Some(close_rel) = text[open..].find(NOCACHE_CLOSE) else {
            break;
        };
        let end = open + close_rel + NOCACHE_CLOSE.len();
        out.push_str(&text[pos..open]);
        out.push_str(&format!("{{{NOCACHE_PLACEHOLDER}{}}}", protected.len()));
        protected.push(text[open..end].to_string());
        pos = end;
    }
    out.push_str(&text[pos..]);
    out
}

fn restore(mut text: String, protected: &[String]) -> String {
    for (index, original) in protected.iter().enumerate().rev() {
        text = text.replace(&format!("{{{NOCACHE_PLACEHOLDER}{index}}}"), original);
    }
    text
}

/// Drop nocache markers, keeping the text they wrapped.
pub(crate) fn strip_nocache_markers(text: &str) -> String {
    text.replace(NOCACHE_OPEN, "").replace(NOCACHE_CLOSE, "")
}

/// Substitute single variable tokens. Names used as tag pairs in `text` are
/// left alone.
fn substitute(text: &str, ctx: &RequestContext, config: &CacheConfig) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some(open_rel) = text[pos..].find('{') {
        let open = pos + open_rel;
        out.push_str(&text[pos..open]);
        let Some(close_rel) = text[open + 1..].find('}') else {
            pos = open;
            break;
        };
        let close = open + 1 + close_rel;
        let inner = &text[open + 1..close];
        if inner.contains('{') {
            out.push('{');
            pos = open + 1;
            continue;
        }

        let (name, params) = inner
            .split_once(char::is_whitespace)
            .unwrap_or((inner, ""));
        let replacement = if is_token_name(name) && !text.contains(&format!("{{/{name}}}")) {
            token_value(name, params, ctx, config)
        } else {
            None
        };
        match replacement {
            Some(value) => out.push_str(&value),
            None => out.push_str(&text[open..=close]),
        }
        pos = close + 1;
    }

    out.push_str(&text[pos..]);
    out
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '@' | '/' | '.'))
}

fn token_value(
    name: &str,
    params: &str,
    ctx: &RequestContext,
    config: &CacheConfig,
) -> Option<String> {
    if name == SESSION_TOKEN {
        return Some(ctx.session_id().to_string());
    }
    if let Some(key) = name.strip_prefix(STASH_PREFIX) {
        return variable(ctx, config, key);
    }
    if name == "current_time" {
        return Some(match quoted_param(params, "format") {
            Some(format) => format_time(ctx.info.now, format),
            None => ctx.info.now.unix_timestamp().to_string(),
        });
    }
    if !params.trim().is_empty() {
        return None;
    }
    request_value(ctx, name).or_else(|| ctx.snippet(name).map(str::to_string))
}

fn variable(ctx: &RequestContext, config: &CacheConfig, key: &str) -> Option<String> {
    if key == "nocache" {
        return None;
    }
    ctx.var(key)
        .map(str::to_string)
        .or_else(|| ctx.var(&ctx.resolve(key, config)).map(str::to_string))
}

/// Values derived from the request itself.
fn request_value(ctx: &RequestContext, name: &str) -> Option<String> {
    if let Some(index) = name.strip_prefix(SEGMENT_PREFIX) {
        let index = index.parse::<usize>().ok()?;
        return Some(ctx.info.segment(index).unwrap_or_default().to_string());
    }
    let member = &ctx.info.member;
    match name {
        "logged_in_member_id" => Some(member.id.to_string()),
        "logged_in_username" => Some(member.username.clone()),
        "logged_in_group_id" => Some(member.group_id.to_string()),
        _ => None,
    }
}

/// Names conditionals may reference.
fn known_value(ctx: &RequestContext, config: &CacheConfig, name: &str) -> Option<String> {
    if name == SESSION_TOKEN {
        return Some(ctx.session_id().to_string());
    }
    if let Some(key) = name.strip_prefix(STASH_PREFIX) {
        return variable(ctx, config, key);
    }
    request_value(ctx, name)
        .or_else(|| ctx.snippet(name).map(str::to_string))
        .or_else(|| ctx.var(name).map(str::to_string))
}

fn quoted_param<'a>(params: &'a str, name: &str) -> Option<&'a str> {
    let start = params.find(&format!("{name}="))? + name.len() + 1;
    let rest = &params[start..];
    let quote = rest.chars().next().filter(|c| matches!(c, '"' | '\''))?;
    let body = &rest[1..];
    body.find(quote).map(|end| &body[..end])
}

/// Render `now` with a strftime pattern. `rfc3339` is accepted as a named
/// format. Malformed patterns render empty.
fn format_time(now: OffsetDateTime, pattern: &str) -> String {
    if pattern.eq_ignore_ascii_case("rfc3339") {
        return now.format(&Rfc3339).unwrap_or_default();
    }
    let Some(utc) = DateTime::<Utc>::from_timestamp(now.unix_timestamp(), now.nanosecond()) else {
        return String::new();
    };

    let mut out = String::new();
    let written = if now.offset().is_utc() {
        write!(out, "{}", utc.format(pattern))
    } else {
        match FixedOffset::east_opt(now.offset().whole_seconds()) {
            Some(offset) => write!(out, "{}", utc.with_timezone(&offset).format(pattern)),
            None => Err(std::fmt::Error),
        }
    };
    match written {
        Ok(()) => out,
        Err(_) => {
            trace!(pattern, "unusable time format");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::application::request::{Member, RequestInfo};
    use crate::application::session::Session;

    /// Host that replaces `{exp:echo}` with `{stash:greeting}` once.
    struct EchoHost;

    #[async_trait]
    impl TemplateHost for EchoHost {
        fn has_tags(&self, text: &str) -> bool {
            text.contains("{exp:")
        }

        async fn parse_tags(
            &self,
            text: &str,
            ctx: &mut RequestContext,
            _depth: usize,
        ) -> Result<String, AppError> {
            ctx.set_var("greeting", "hi");
            Ok(text.replace("{exp:echo}", "{stash:greeting}"))
        }
    }

    fn context() -> RequestContext {
        let now = datetime!(2024-03-05 14:07:09 UTC);
        let mut info = RequestInfo::new(1)
            .with_path("/blog/post")
            .with_member(Member {
                id: 7,
                username: "ada".into(),
                group_id: 5,
            });
        info.now = now;
        RequestContext::new(info, Session::mint(now), true)
    }

    fn expander(config: &CacheConfig) -> Expander<'_> {
        Expander { config, hook: None }
    }

    #[tokio::test]
    async fn plain_text_is_unchanged_for_any_depth() {
        let config = CacheConfig::default();
        let mut ctx = context();
        let body = "<p>Nothing {to} see {stash:nocache}{here}{/stash:nocache}</p>";
        for passes in [0, 1, 4] {
            let opts = ExpandOptions {
                passes,
                ..ExpandOptions::all(&config)
            };
            let out = expander(&config)
                .expand(&mut ctx, &EchoHost, body, opts, 0)
                .await
                .unwrap();
            assert_eq!(out, body);
        }
    }

    #[tokio::test]
    async fn tag_output_is_substituted_on_the_next_pass() {
        let config = CacheConfig::default();
        let mut ctx = context();
        let out = expander(&config)
            .expand(&mut ctx, &EchoHost, "{exp:echo}!", ExpandOptions::all(&config), 0)
            .await
            .unwrap();
        assert_eq!(out, "hi!");
    }

    #[tokio::test]
    async fn nocache_regions_survive_substitution() {
        let config = CacheConfig::default();
        let mut ctx = context();
        ctx.set_var("x", "1");
        let out = expander(&config)
            .expand(
                &mut ctx,
                &EchoHost,
                "{stash:x}{stash:nocache}{stash:x}{/stash:nocache}",
                ExpandOptions::all(&config),
                0,
            )
            .await
            .unwrap();
        assert_eq!(out, "1{stash:nocache}{stash:x}{/stash:nocache}");
        assert_eq!(strip_nocache_markers(&out), "1{stash:x}");
    }

    #[test]
    fn tag_pairs_are_not_substituted() {
        let config = CacheConfig::default();
        let mut ctx = context();
        ctx.set_var("title", "T");
        let text = "{stash:title}{stash:title}x{/stash:title}";
        assert_eq!(substitute(text, &ctx, &config), text);
    }

    #[test]
    fn request_tokens_are_substituted() {
        let config = CacheConfig::default();
        let mut ctx = context();
        ctx.set_snippet("brand", "Acme");
        let out = substitute(
            "{segment_1}/{segment_3}|{logged_in_username}#{logged_in_member_id}|{brand}|{unknown}",
            &ctx,
            &config,
        );
        assert_eq!(out, "blog/|ada#7|Acme|{unknown}");
    }

    #[test]
    fn current_time_formats() {
        let config = CacheConfig::default();
        let ctx = context();
        assert_eq!(
            substitute("{current_time format=\"%Y-%m-%d %H:%M\"}", &ctx, &config),
            "2024-03-05 14:07"
        );
        assert_eq!(
            substitute("{current_time}", &ctx, &config),
            ctx.info.now.unix_timestamp().to_string()
        );
        assert_eq!(format_time(ctx.info.now, "%a %e %b"), "Tue  5 Mar");
        assert_eq!(format_time(ctx.info.now, "%I:%M %p %Z"), "02:07 PM UTC");
        assert_eq!(
            format_time(ctx.info.now.to_offset(time::macros::offset!(+2)), "%H:%M %z"),
            "16:07 +0200"
        );
        assert_eq!(format_time(ctx.info.now, "%Q"), "");
    }

    #[tokio::test]
    async fn unknown_names_decide_after_the_last_pass() {
        let config = CacheConfig::default();
        let mut ctx = context();
        ctx.set_var("a", "1");
        let out = expander(&config)
            .expand(
                &mut ctx,
                &EchoHost,
                "{if stash:a == 1}A{/if}{if missing}M{if:else}N{/if}",
                ExpandOptions::all(&config),
                0,
            )
            .await
            .unwrap();
        assert_eq!(out, "AN");
    }
}

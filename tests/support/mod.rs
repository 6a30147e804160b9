//! Minimal template host for driving the engine end to end.
//!
//! Understands `{exp:stash:VERB key="value"}` single tags and
//! `{exp:stash:VERB ...}body{/exp:stash:VERB}` pairs. Tag output is spliced
//! back into the template and scanned again, like a real host would.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use stash::application::error::AppError;
use stash::application::tag::Tag;
use stash::application::verb::Verb;
use stash::cache::CacheConfig;
use stash::infra::memory::MemoryRepository;
use stash::{RequestContext, RequestInfo, Stash, TemplateHost};
use time::OffsetDateTime;
use time::macros::datetime;

const OPEN: &str = "{exp:stash:";

pub const NOW: OffsetDateTime = datetime!(2024-06-01 12:00:00 UTC);

pub struct FakeHost {
    pub stash: Stash,
    pub repo: Arc<MemoryRepository>,
}

impl FakeHost {
    pub fn new(config: CacheConfig) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let stash = Stash::new(config, repo.clone());
        Self { stash, repo }
    }

    pub async fn begin(&self, info: RequestInfo) -> RequestContext {
        self.begin_at(info, NOW).await
    }

    pub async fn begin_at(&self, info: RequestInfo, now: OffsetDateTime) -> RequestContext {
        let mut info = info;
        info.now = now;
        self.stash
            .begin_request(info)
            .await
            .expect("request context")
    }

    /// Parse every tag in `template`, then replay deferred tags.
    pub async fn render(
        &self,
        ctx: &mut RequestContext,
        template: &str,
    ) -> Result<String, AppError> {
        let parsed = self.parse_tags(template, ctx, 0).await?;
        self.stash.finalize(ctx, self, parsed).await
    }
}

#[async_trait]
impl TemplateHost for FakeHost {
    fn has_tags(&self, text: &str) -> bool {
        text.contains(OPEN)
    }

    async fn parse_tags(
        &self,
        text: &str,
        ctx: &mut RequestContext,
        depth: usize,
    ) -> Result<String, AppError> {
        let mut template = text.to_string();
        let mut pos = 0;

        while let Some(rel) = template[pos..].find(OPEN) {
            let start = pos + rel;
            let Some(end_rel) = template[start..].find('}') else {
                break;
            };
            let end = start + end_rel;
            let opening = template[start..=end].to_string();
            let inner = &template[start + OPEN.len()..end];
            let (name, params) = inner.split_once(' ').unwrap_or((inner, ""));
            let name = name.to_string();
            let verb: Verb = name.parse()?;

            let mut tag = Tag::new(opening);
            for (key, value) in parse_params(params) {
                tag.set_param(key, value);
            }

            let close = format!("{{/exp:stash:{name}}}");
            let after = end + 1;
            let consumed_to = match find_close(&template[after..], &name) {
                Some(body_len) => {
                    tag = tag.with_body(&template[after..after + body_len]);
                    after + body_len + close.len()
                }
                None => after,
            };

            let output = self.stash.call(ctx, self, verb, tag, depth).await?;
            template.replace_range(start..consumed_to, &output);
            pos = start;
        }

        Ok(template)
    }
}

fn parse_params(params: &str) -> Vec<(String, String)> {
    let pattern = Regex::new(r#"([A-Za-z_:]+)="([^"]*)""#).expect("param regex");
    pattern
        .captures_iter(params)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Length of the pair body up to the matching close tag, honouring nested
/// pairs of the same verb.
fn find_close(rest: &str, name: &str) -> Option<usize> {
    let open = format!("{OPEN}{name}");
    let close = format!("{{/exp:stash:{name}}}");
    let mut nesting = 0usize;
    let mut pos = 0;

    loop {
        let next_close = rest[pos..].find(&close).map(|i| pos + i)?;
        let next_open = rest[pos..]
            .match_indices(&open)
            .map(|(i, _)| pos + i)
            .find(|&i| matches!(rest.as_bytes().get(i + open.len()), Some(b' ' | b'}')));

        match next_open {
            Some(open_at) if open_at < next_close => {
                nesting += 1;
                pos = open_at + open.len();
            }
            _ if nesting == 0 => return Some(next_close),
            _ => {
                nesting -= 1;
                pos = next_close + close.len();
            }
        }
    }
}

pub fn visitor() -> RequestInfo {
    RequestInfo::new(1).with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
}

//! List verbs: building, combining, querying and rendering encoded lists.

use tracing::debug;

use crate::application::engine::Stash;
use crate::application::error::AppError;
use crate::application::host::TemplateHost;
use crate::application::request::RequestContext;
use crate::application::store::{GetOptions, SetOptions, name_param};
use crate::application::tag::Tag;
use crate::domain::list::{self, Row};
use crate::domain::pattern::Pattern;
use crate::domain::query::{ListQuery, Membership, Order, Pagination, RowFilter, Unique};
use crate::domain::types::{Scope, WriteMode, parse_flag};

const PAGINATE_OPEN: &str = "{paginate}";
const PAGINATE_CLOSE: &str = "{/paginate}";
const IF_OPEN: &str = "{if ";
const IF_CLOSE: &str = "{/if}";
const PAGE_SEGMENT_PREFIX: char = 'P';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaginatePosition {
    Top,
    Bottom,
    Both,
}

impl PaginatePosition {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Self::Top,
            "both" => Self::Both,
            _ => Self::Bottom,
        }
    }
}

impl Stash {
    pub(crate) async fn set_list(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let encoded = self.encoded_body(ctx, host, tag, depth).await?;
        let opts = SetOptions::from_tag(tag, &self.config, WriteMode::Replace)?;
        self.store.set(ctx, &opts, encoded).await?;
        Ok(String::new())
    }

    /// `append_list` / `prepend_list`: join the body's rows onto the current
    /// list with the row delimiter.
    pub(crate) async fn extend_list(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        append: bool,
        depth: usize,
    ) -> Result<String, AppError> {
        let addition = self.encoded_body(ctx, host, tag, depth).await?;
        let mut opts = SetOptions::from_tag(tag, &self.config, WriteMode::Replace)?;
        let current = self
            .store
            .lookup(ctx, &GetOptions::restricted(&opts))
            .await?
            .unwrap_or_default();
        opts.replace = true;
        self.store
            .set(ctx, &opts, list::join_encoded(&current, &addition, append))
            .await?;
        Ok(String::new())
    }

    /// Concatenate the lists named in `lists="a|b"` into `name`.
    pub(crate) async fn join_lists(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let sources = tag
            .get("lists")
            .ok_or_else(|| AppError::validation("`lists` parameter is required"))?;
        let scope = tag.typed::<Scope>("scope")?.unwrap_or(self.config.default_scope);

        let mut joined = String::new();
        for source in sources.split('|').map(str::trim).filter(|s| !s.is_empty()) {
            let mut get = GetOptions::new(source, &self.config);
            get.scope = scope;
            let value = self.store.get(ctx, &get).await?;
            joined = list::join_encoded(&joined, &value, true);
        }

        let opts = SetOptions::from_tag(tag, &self.config, WriteMode::Replace)?;
        self.store.set(ctx, &opts, joined).await?;
        Ok(String::new())
    }

    /// Write the rows of `name` selected by the query parameters into
    /// `into`.
    pub(crate) async fn split_list(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let rows = self.list_rows(ctx, tag).await?;
        let query = self.list_query(ctx, tag, 0)?;
        let result = query.apply(rows);

        let target = name_param(tag, "into")?;
        let mut opts = SetOptions::from_tag_named(tag, &self.config, WriteMode::Replace, target)?;
        opts.gate = None;
        self.store.set(ctx, &opts, list::encode(&result.rows)).await?;
        Ok(String::new())
    }

    pub(crate) async fn list_count(
        &self,
        ctx: &mut RequestContext,
        tag: &Tag,
    ) -> Result<String, AppError> {
        let rows = self.list_rows(ctx, tag).await?;
        let mut query = self.list_query(ctx, tag, 0)?;
        query.offset = 0;
        query.limit = None;
        Ok(query.apply(rows).absolute_results.to_string())
    }

    /// Render a list through the tag body, one copy per selected row.
    pub(crate) async fn get_list(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let rows = self.list_rows(ctx, tag).await?;
        let (template, paginate_block) = take_paginate(tag.body());
        let paginating = paginate_block.is_some() || tag.has("paginate");
        let page_offset = if paginating { page_offset(ctx) } else { 0 };

        let query = self.list_query(ctx, tag, page_offset)?;
        let offset = query.offset;
        let result = query.apply(rows);

        let prefix = tag.get("prefix");
        let no_results = prefixed(prefix, "no_results");
        let (template, no_results_block) = take_if_block(&template, &no_results);

        if result.rows.is_empty() {
            debug!("list rendered no rows");
            let fallback = no_results_block.unwrap_or_default();
            return self.post_process(ctx, host, tag, fallback, false, depth).await;
        }

        if let Some(column) = tag.get("track") {
            let values: Vec<String> = result
                .rows
                .iter()
                .filter_map(|row| row.get(column).map(str::to_string))
                .collect();
            ctx.track(column, values);
        }

        let total = result.rows.len();
        let rows: Vec<Row> = result
            .rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let mut out = Row::new();
                for (key, value) in row.iter() {
                    out.set(prefixed(prefix, key), value);
                }
                out.set(prefixed(prefix, "count"), (index + 1).to_string());
                out.set(prefixed(prefix, "total_results"), total.to_string());
                out.set(
                    prefixed(prefix, "absolute_count"),
                    (offset + index + 1).to_string(),
                );
                out.set(
                    prefixed(prefix, "absolute_results"),
                    result.absolute_results.to_string(),
                );
                out
            })
            .collect();

        let mut rendered = host.parse_variables(&template, &rows);
        if let Some(count) = tag.usize("backspace")? {
            let keep = rendered.chars().count().saturating_sub(count);
            rendered = rendered.chars().take(keep).collect();
        }

        if let Some(block) = paginate_block {
            let pagination = Pagination {
                per_page: tag.usize("limit")?.unwrap_or(result.absolute_results),
                offset,
                total_items: result.absolute_results,
            };
            let block = render_pagination(&block, &pagination);
            rendered = match PaginatePosition::parse(tag.get_or("paginate", "bottom")) {
                PaginatePosition::Top => format!("{block}{rendered}"),
                PaginatePosition::Bottom => format!("{rendered}{block}"),
                PaginatePosition::Both => format!("{block}{rendered}{block}"),
            };
        }

        self.post_process(ctx, host, tag, rendered, false, depth).await
    }

    async fn encoded_body(
        &self,
        ctx: &mut RequestContext,
        host: &dyn TemplateHost,
        tag: &Tag,
        depth: usize,
    ) -> Result<String, AppError> {
        let body = self
            .post_process(ctx, host, tag, tag.body().to_string(), false, depth)
            .await?;
        Ok(list::encode(&list::rows_from_tag_pairs(&body)))
    }

    async fn list_rows(&self, ctx: &mut RequestContext, tag: &Tag) -> Result<Vec<Row>, AppError> {
        let mut opts = GetOptions::from_tag(tag, &self.config)?;
        // `match`/`against` filter rows here, not the whole value.
        opts.gate = None;
        let value = self.store.get(ctx, &opts).await?;
        Ok(list::decode(&value))
    }

    fn list_query(
        &self,
        ctx: &RequestContext,
        tag: &Tag,
        page_offset: usize,
    ) -> Result<ListQuery, AppError> {
        let membership = match (tag.get("in"), tag.get("not_in")) {
            (Some(column), _) => Some(Membership::In {
                column: column.to_string(),
                values: ctx.tracked(column),
            }),
            (None, Some(column)) => Some(Membership::NotIn {
                column: column.to_string(),
                values: ctx.tracked(column),
            }),
            (None, None) => None,
        };

        let filter = match (tag.get("match"), tag.get("against")) {
            (Some(pattern), Some(column)) => Some(RowFilter {
                column: column.to_string(),
                regex: Pattern::parse_regex(pattern)?,
            }),
            _ => None,
        };

        let unique = tag.get("unique").and_then(|value| {
            let lowered = value.trim().to_ascii_lowercase();
            if parse_flag(&lowered) {
                Some(Unique::WholeRow)
            } else if matches!(lowered.as_str(), "no" | "n" | "off" | "0" | "false") {
                None
            } else {
                Some(Unique::Column(value.trim().to_string()))
            }
        });

        let order = tag
            .get("orderby")
            .map(|orderby| {
                Order::parse(
                    orderby,
                    tag.get_or("sort", "asc"),
                    tag.get_or("sort_type", "string"),
                )
            })
            .transpose()?;

        Ok(ListQuery {
            slice: tag.get("slice").map(ListQuery::parse_slice).transpose()?,
            membership,
            filter,
            unique,
            order,
            offset: tag.usize("offset")?.unwrap_or(0) + page_offset,
            limit: tag.usize("limit")?,
        })
    }
}

fn prefixed(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{name}"),
        None => name.to_string(),
    }
}

/// Row offset encoded by a trailing `P<n>` route segment.
fn page_offset(ctx: &RequestContext) -> usize {
    ctx.info
        .segments
        .last()
        .and_then(|segment| segment.strip_prefix(PAGE_SEGMENT_PREFIX))
        .and_then(|digits| digits.parse::<usize>().ok())
        .unwrap_or(0)
}

/// Split the `{paginate}` block out of a body.
fn take_paginate(body: &str) -> (String, Option<String>) {
    let Some(start) = body.find(PAGINATE_OPEN) else {
        return (body.to_string(), None);
    };
    let inner_start = start + PAGINATE_OPEN.len();
    let Some(end_rel) = body[inner_start..].find(PAGINATE_CLOSE) else {
        return (body.to_string(), None);
    };
    let end = inner_start + end_rel;
    let rest = format!("{}{}", &body[..start], &body[end + PAGINATE_CLOSE.len()..]);
    (rest, Some(body[inner_start..end].to_string()))
}

/// Split `{if <name>}…{/if}` out of a body, honouring nested blocks.
fn take_if_block(body: &str, name: &str) -> (String, Option<String>) {
    let open = format!("{IF_OPEN}{name}}}");
    let Some(start) = body.find(&open) else {
        return (body.to_string(), None);
    };
    let inner_start = start + open.len();
    let mut depth = 0usize;
    let mut pos = inner_start;

    while let Some(close_rel) = body[pos..].find(IF_CLOSE) {
        let close = pos + close_rel;
        match body[pos..close].find(IF_OPEN) {
            Some(open_rel) => {
                depth += 1;
                pos += open_rel + IF_OPEN.len();
            }
            None if depth > 0 => {
                depth -= 1;
                pos = close + IF_CLOSE.len();
            }
            None => {
                let rest = format!("{}{}", &body[..start], &body[close + IF_CLOSE.len()..]);
                return (rest, Some(body[inner_start..close].to_string()));
            }
        }
    }
    (body.to_string(), None)
}

fn render_pagination(block: &str, pagination: &Pagination) -> String {
    block
        .replace("{current_page}", &pagination.current_page().to_string())
        .replace("{total_pages}", &pagination.total_pages().to_string())
        .replace("{per_page}", &pagination.per_page.to_string())
        .replace("{total_items}", &pagination.total_items.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_block_is_lifted_out() {
        let (rest, block) = take_paginate("{title}{paginate}Page {current_page}{/paginate}");
        assert_eq!(rest, "{title}");
        assert_eq!(block.as_deref(), Some("Page {current_page}"));
    }

    #[test]
    fn no_results_block_handles_nesting() {
        let body = "{title}{if no_results}{if a}x{/if}none{/if}!";
        let (rest, block) = take_if_block(body, "no_results");
        assert_eq!(rest, "{title}!");
        assert_eq!(block.as_deref(), Some("{if a}x{/if}none"));
    }

    #[test]
    fn pagination_placeholders() {
        let pagination = Pagination {
            per_page: 2,
            offset: 2,
            total_items: 5,
        };
        assert_eq!(
            render_pagination("{current_page}/{total_pages} ({per_page} of {total_items})", &pagination),
            "2/3 (2 of 5)"
        );
    }

    #[test]
    fn prefixes_apply_to_every_name() {
        assert_eq!(prefixed(Some("p"), "count"), "p:count");
        assert_eq!(prefixed(None, "count"), "count");
    }
}

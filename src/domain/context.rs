//! Expansion of symbolic name prefixes into concrete variable names.
//!
//! `@:` stands for the current context and `@URI:` for the current page key.
//! A configured variable prefix is injected in front of the final name
//! segment. Resolution is pure: callers supply the context and page key.

/// Prefix standing for the current context.
pub const CONTEXT_TOKEN: &str = "@:";
/// Prefix standing for the current page key.
pub const PAGE_TOKEN: &str = "@URI:";
/// Separator between a context and the name it qualifies.
pub const CONTEXT_SEPARATOR: char = ':';

/// Inputs needed to resolve a name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveEnv<'a> {
    pub context: &'a str,
    pub page_key: &'a str,
    pub var_prefix: Option<&'a str>,
}

/// Resolve `name` into the concrete key it refers to.
pub fn resolve(name: &str, env: &ResolveEnv<'_>) -> String {
    let expanded = if let Some(rest) = name.strip_prefix(CONTEXT_TOKEN) {
        qualify(env.context, rest)
    } else if let Some(rest) = name.strip_prefix(PAGE_TOKEN) {
        qualify(env.page_key, rest)
    } else {
        name.to_string()
    };

    match env.var_prefix {
        Some(prefix) if !prefix.is_empty() => inject_prefix(&expanded, prefix),
        _ => expanded,
    }
}

/// Whether `name` carries a symbolic prefix that needs the page key.
pub fn needs_page_key(name: &str) -> bool {
    name.starts_with(PAGE_TOKEN)
}

/// Normalize a route into a page key.
///
/// Segments are joined by `/`; an empty route maps to `index`. With
/// `include_query`, a non-empty query string is appended after `?`.
pub fn page_key(
    segments: &[String],
    query: Option<&str>,
    index: &str,
    include_query: bool,
) -> String {
    let path = segments
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let mut key = if path.is_empty() {
        index.to_string()
    } else {
        path
    };

    if include_query {
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            key.push('?');
            key.push_str(query.trim_start_matches('?'));
        }
    }

    key
}

fn qualify(context: &str, rest: &str) -> String {
    if context.is_empty() {
        rest.to_string()
    } else {
        format!("{context}{CONTEXT_SEPARATOR}{rest}")
    }
}

fn inject_prefix(name: &str, prefix: &str) -> String {
    match name.rfind(CONTEXT_SEPARATOR) {
        Some(pos) => {
            let (head, tail) = name.split_at(pos + 1);
            if tail.starts_with(prefix) {
                name.to_string()
            } else {
                format!("{head}{prefix}{tail}")
            }
        }
        None if name.starts_with(prefix) => name.to_string(),
        None => format!("{prefix}{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(context: &'a str, page: &'a str, prefix: Option<&'a str>) -> ResolveEnv<'a> {
        ResolveEnv {
            context,
            page_key: page,
            var_prefix: prefix,
        }
    }

    #[test]
    fn context_token_expands_to_current_context() {
        assert_eq!(resolve("@:title", &env("blog", "", None)), "blog:title");
    }

    #[test]
    fn empty_context_leaves_bare_name() {
        assert_eq!(resolve("@:title", &env("", "", None)), "title");
    }

    #[test]
    fn page_token_expands_to_page_key() {
        assert_eq!(
            resolve("@URI:sidebar", &env("", "news/article", None)),
            "news/article:sidebar"
        );
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(resolve("title", &env("blog", "x", None)), "title");
    }

    #[test]
    fn prefix_lands_after_context_separator() {
        assert_eq!(resolve("foo:bar", &env("", "", Some("pre_"))), "foo:pre_bar");
        assert_eq!(resolve("bar", &env("", "", Some("pre_"))), "pre_bar");
        assert_eq!(
            resolve("@:title", &env("blog", "", Some("pre_"))),
            "blog:pre_title"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let env = env("blog", "a/b", Some("pre_"));
        let once = resolve("@:title", &env);
        assert_eq!(resolve(&once, &env), once);
        let once = resolve("plain", &env);
        assert_eq!(resolve(&once, &env), once);
    }

    #[test]
    fn page_key_uses_index_sentinel_for_empty_route() {
        assert_eq!(page_key(&[], None, "[index]", false), "[index]");
    }

    #[test]
    fn page_key_joins_segments_and_optionally_appends_query() {
        let segments = vec!["blog".to_string(), "post".to_string()];
        assert_eq!(
            page_key(&segments, Some("a=1"), "[index]", false),
            "blog/post"
        );
        assert_eq!(
            page_key(&segments, Some("?a=1"), "[index]", true),
            "blog/post?a=1"
        );
    }
}

//! Seams to the host template engine.

use async_trait::async_trait;

use crate::application::error::AppError;
use crate::application::request::RequestContext;
use crate::domain::conditionals::{self, Resolution};
use crate::domain::list::Row;

/// The template engine that tokenizes tag syntax and executes tags.
///
/// `parse_tags` runs one round of nested-tag execution over `text`; tags it
/// finds re-enter the engine with `depth` so recursion stays bounded.
#[async_trait]
pub trait TemplateHost: Send + Sync {
    /// Whether `text` still contains tag syntax the host would execute.
    fn has_tags(&self, text: &str) -> bool;

    async fn parse_tags(
        &self,
        text: &str,
        ctx: &mut RequestContext,
        depth: usize,
    ) -> Result<String, AppError>;

    /// Render `template` once per row and concatenate the results.
    ///
    /// Row-level `{if}` blocks are decided against the row's own columns;
    /// blocks naming anything else are left for the page.
    fn parse_variables(&self, template: &str, rows: &[Row]) -> String {
        let mut out = String::new();
        for row in rows {
            let lookup = |name: &str| row.get(name).map(str::to_string);
            let mut rendered = conditionals::evaluate(template, Resolution::KnownOnly, &lookup);
            for (column, value) in row.iter() {
                rendered = rendered.replace(&format!("{{{column}}}"), value);
            }
            out.push_str(&rendered);
        }
        out
    }
}

/// Extension point run on every expansion result after nocache regions are
/// restored.
pub trait ParseHook: Send + Sync {
    fn final_parse(&self, text: String, ctx: &RequestContext) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    #[async_trait]
    impl TemplateHost for Plain {
        fn has_tags(&self, _text: &str) -> bool {
            false
        }

        async fn parse_tags(
            &self,
            text: &str,
            _ctx: &mut RequestContext,
            _depth: usize,
        ) -> Result<String, AppError> {
            Ok(text.to_string())
        }
    }

    #[test]
    fn rows_render_with_their_own_conditionals() {
        let rows = vec![
            Row::from_pairs([("title", "A"), ("featured", "1")]),
            Row::from_pairs([("title", "B"), ("featured", "0")]),
        ];
        let out = Plain.parse_variables("{title}{if featured == 1}*{/if};", &rows);
        assert_eq!(out, "A*;B;");
    }

    #[test]
    fn foreign_conditionals_are_left_alone() {
        let rows = vec![Row::from_pairs([("title", "A")])];
        let out = Plain.parse_variables("{if logged_in}{title}{/if}", &rows);
        assert_eq!(out, "{if logged_in}A{/if}");
    }
}

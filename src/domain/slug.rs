//! Slug-safe relative paths derived from variable names and page keys.
//!
//! File fallbacks and the static page cache both map template-level names
//! onto the filesystem. Names are split on `:` and `/`, each segment is
//! slugified (`slug` crate) with underscores preserved, and anything that
//! could escape the base directory is rejected.

use slug::slugify;

use super::error::DomainError;

const NAME_SEPARATORS: [char; 2] = [':', '/'];

/// A relative path built from slug-safe segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath {
    segments: Vec<String>,
    extension: Option<String>,
}

impl SafePath {
    /// Build a path from a `:`/`/`-delimited name. A trailing extension is
    /// kept only when it appears in `allowed`.
    pub fn from_name(name: &str, allowed: &[String]) -> Result<Self, DomainError> {
        let (stem, extension) = split_extension(name.trim(), allowed);
        let segments = stem
            .split(NAME_SEPARATORS)
            .filter(|segment| !segment.is_empty())
            .map(|segment| slug_segment(segment).ok_or_else(|| invalid(name)))
            .collect::<Result<Vec<_>, _>>()?;

        if segments.is_empty() {
            return Err(invalid(name));
        }
        Ok(Self {
            segments,
            extension,
        })
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Render as `a/b/c` with the given extension (or the parsed one).
    pub fn render(&self, extension: Option<&str>) -> String {
        let joined = self.segments.join("/");
        match extension.or(self.extension.as_deref()) {
            Some(ext) => format!("{joined}.{ext}"),
            None => joined,
        }
    }
}

/// Directory for a page key inside the static cache. The index sentinel
/// maps to the root directory and query strings are dropped.
pub fn page_directory(page_key: &str, index: &str) -> Result<String, DomainError> {
    let path = page_key.split('?').next().unwrap_or_default();
    if path == index || path.trim_matches('/').is_empty() {
        return Ok(String::new());
    }
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| slug_segment(segment).ok_or_else(|| invalid(page_key)))
        .collect::<Result<Vec<_>, _>>()
        .map(|segments| segments.join("/"))
}

fn split_extension<'a>(name: &'a str, allowed: &[String]) -> (&'a str, Option<String>) {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(&ext)) {
            return (stem, Some(ext));
        }
    }
    (name, None)
}

fn slug_segment(segment: &str) -> Option<String> {
    let slug = segment
        .split('_')
        .map(slugify)
        .collect::<Vec<_>>()
        .join("_");
    if slug.trim_matches('_').is_empty() {
        None
    } else {
        Some(slug)
    }
}

fn invalid(name: &str) -> DomainError {
    DomainError::InvalidFileName(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        ["html", "md"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn name_segments_become_directories() {
        let path = SafePath::from_name("partials:Site Header", &allowed()).unwrap();
        assert_eq!(path.render(Some("html")), "partials/site-header.html");
    }

    #[test]
    fn allowed_extension_is_preserved() {
        let path = SafePath::from_name("docs/intro.md", &allowed()).unwrap();
        assert_eq!(path.extension(), Some("md"));
        assert_eq!(path.render(None), "docs/intro.md");
    }

    #[test]
    fn unknown_extensions_stay_in_the_stem() {
        assert_eq!(split_extension("intro.HTML", &allowed()), ("intro", Some("html".into())));
        assert_eq!(split_extension("archive.tar", &allowed()), ("archive.tar", None));
    }

    #[test]
    fn underscores_survive() {
        let path = SafePath::from_name("my_snippet", &allowed()).unwrap();
        assert_eq!(path.render(None), "my_snippet");
    }

    #[test]
    fn traversal_segments_are_rejected() {
        assert!(SafePath::from_name("../../etc/passwd", &allowed()).is_err());
        assert!(SafePath::from_name("..", &allowed()).is_err());
        assert!(SafePath::from_name("", &allowed()).is_err());
    }

    #[test]
    fn index_page_maps_to_root_directory() {
        assert_eq!(page_directory("[index]", "[index]").unwrap(), "");
        assert_eq!(
            page_directory("Blog/My Post?x=1", "[index]").unwrap(),
            "blog/my-post"
        );
    }
}

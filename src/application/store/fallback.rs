//! Fallback sources consulted when every tier misses.

use std::io::ErrorKind;

use tracing::debug;

use crate::application::error::AppError;
use crate::application::request::RequestInfo;
use crate::cache::CacheConfig;
use crate::domain::slug::SafePath;
use crate::infra::error::InfraError;

const SEGMENT_PREFIX: &str = "segment_";

/// Look `name` up in POST data, then the query string, then route segments
/// (`segment_<n>`).
pub(crate) fn dynamic_value(info: &RequestInfo, name: &str) -> Option<String> {
    if let Some(value) = info.post.get(name).or_else(|| info.query.get(name)) {
        return Some(value.clone());
    }
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|index| index.parse::<usize>().ok())
        .and_then(|index| info.segment(index))
        .map(str::to_string)
}

/// Read a template file under the configured base path.
///
/// Without an explicit extension every allowed extension is tried in order.
pub(crate) async fn file_value(
    config: &CacheConfig,
    name: &str,
    file_name: Option<&str>,
) -> Result<String, AppError> {
    let base = config.file_basepath.as_ref().ok_or_else(|| {
        AppError::validation("file fallback requested but no file_basepath is configured")
    })?;
    let path = SafePath::from_name(file_name.unwrap_or(name), &config.file_extensions)?;

    let candidates: Vec<String> = match path.extension() {
        Some(_) => vec![path.render(None)],
        None => config
            .file_extensions
            .iter()
            .map(|ext| path.render(Some(ext)))
            .collect(),
    };

    for candidate in &candidates {
        let full = base.join(candidate);
        match tokio::fs::read_to_string(&full).await {
            Ok(contents) => {
                debug!(path = %full.display(), "file fallback hit");
                return Ok(contents);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(InfraError::template_read(&full, err).into()),
        }
    }

    Err(AppError::FileNotFound {
        path: base.join(candidates.first().map(String::as_str).unwrap_or(name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_prefers_post_then_query_then_segments() {
        let mut info = RequestInfo::new(1).with_path("/news/item?q=query");
        info.post.insert("q".to_string(), "posted".to_string());
        assert_eq!(dynamic_value(&info, "q").as_deref(), Some("posted"));
        info.post.clear();
        assert_eq!(dynamic_value(&info, "q").as_deref(), Some("query"));
        assert_eq!(dynamic_value(&info, "segment_2").as_deref(), Some("item"));
        assert_eq!(dynamic_value(&info, "segment_9"), None);
        assert_eq!(dynamic_value(&info, "missing"), None);
    }

    #[tokio::test]
    async fn file_fallback_tries_allowed_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("partials")).unwrap();
        std::fs::write(dir.path().join("partials/header.md"), "# Header").unwrap();
        let config = CacheConfig {
            file_basepath: Some(dir.path().to_path_buf()),
            ..CacheConfig::default()
        };

        let value = file_value(&config, "partials:header", None).await.unwrap();
        assert_eq!(value, "# Header");
    }

    #[tokio::test]
    async fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            file_basepath: Some(dir.path().to_path_buf()),
            ..CacheConfig::default()
        };

        let err = file_value(&config, "nope", None).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound { .. }));
        assert!(err.is_configuration_error());
    }
}

//! Cache tuning.
//!
//! Controls scoping defaults, persistence, bot handling, pruning and the
//! file fallbacks via the `[stash]` section of `stash.toml`.

use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;

use crate::domain::types::Scope;

pub(crate) const DEFAULT_BUNDLE: &str = "default";
pub(crate) const DEFAULT_REFRESH_MINUTES: u64 = 1440;
pub(crate) const DEFAULT_PARSE_DEPTH: usize = 3;
pub(crate) const DEFAULT_MAX_CALL_DEPTH: usize = 16;
pub(crate) const DEFAULT_PRUNE_PROBABILITY: f64 = 0.4;
pub(crate) const DEFAULT_SESSION_REFRESH_SECS: u64 = 300;
pub(crate) const DEFAULT_COOKIE_NAME: &str = "stashid";
pub(crate) const DEFAULT_URI_INDEX: &str = "[index]";
pub(crate) const DEFAULT_ADMIN_GROUP_ID: i64 = 1;
pub(crate) const DEFAULT_BOTS: [&str; 8] = [
    "bot", "crawl", "spider", "archive", "search", "java", "yahoo", "teoma",
];
pub(crate) const DEFAULT_FILE_EXTENSIONS: [&str; 7] =
    ["html", "md", "css", "js", "rss", "xml", "txt"];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Scope used when a tag names none.
    pub default_scope: Scope,
    /// Bundle written to when a tag names none.
    pub default_bundle: String,
    /// Lifetime of persisted values; zero keeps them forever.
    pub default_refresh_minutes: u64,
    /// Expansion passes when a tag does not set `parse_depth`.
    pub parse_depth: usize,
    /// Nesting bound for tags re-entering the engine through the host.
    pub max_call_depth: usize,
    /// Classify crawlers on first contact and keep them read-only.
    pub limit_bots: bool,
    /// User-agent substrings identifying crawlers.
    pub bots: Vec<String>,
    pub prune_enabled: bool,
    /// Chance that a stale session triggers an expiry sweep.
    pub prune_probability: f64,
    /// Age after which a session cookie is refreshed.
    pub session_refresh: Duration,
    pub cookie_name: String,
    pub cookie_secret: String,
    /// Keys younger than this survive pattern deletes.
    pub invalidation_period: Duration,
    pub file_basepath: Option<PathBuf>,
    pub file_extensions: Vec<String>,
    pub static_cache_dir: Option<PathBuf>,
    pub var_prefix: Option<String>,
    /// Page key used for the empty route.
    pub uri_index: String,
    pub include_query_string: bool,
    /// Member group allowed to flush the persistent cache.
    pub admin_group_id: i64,
    /// Interval of the background sweeper; `None` leaves pruning to the
    /// probabilistic gate.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_scope: Scope::User,
            default_bundle: DEFAULT_BUNDLE.to_string(),
            default_refresh_minutes: DEFAULT_REFRESH_MINUTES,
            parse_depth: DEFAULT_PARSE_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            limit_bots: false,
            bots: DEFAULT_BOTS.iter().map(|s| s.to_string()).collect(),
            prune_enabled: true,
            prune_probability: DEFAULT_PRUNE_PROBABILITY,
            session_refresh: Duration::from_secs(DEFAULT_SESSION_REFRESH_SECS),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_secret: String::new(),
            invalidation_period: Duration::ZERO,
            file_basepath: None,
            file_extensions: DEFAULT_FILE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            static_cache_dir: None,
            var_prefix: None,
            uri_index: DEFAULT_URI_INDEX.to_string(),
            include_query_string: false,
            admin_group_id: DEFAULT_ADMIN_GROUP_ID,
            sweep_interval: None,
        }
    }
}

impl CacheConfig {
    /// Absolute expiry for a value written now with `refresh_minutes`
    /// (falling back to the default). Zero means "never".
    pub fn expiry(&self, refresh_minutes: Option<u64>, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let minutes = refresh_minutes.unwrap_or(self.default_refresh_minutes);
        if minutes == 0 {
            return None;
        }
        let minutes = i64::try_from(minutes).unwrap_or(i64::MAX).min(i64::MAX / 60);
        now.checked_add(time::Duration::minutes(minutes))
    }

    /// Whether the user agent looks like a crawler. Empty agents count.
    pub fn is_bot(&self, user_agent: Option<&str>) -> bool {
        let agent = match user_agent.map(str::trim) {
            Some(agent) if !agent.is_empty() => agent.to_ascii_lowercase(),
            _ => return true,
        };
        self.bots
            .iter()
            .any(|token| !token.is_empty() && agent.contains(&token.to_ascii_lowercase()))
    }

    pub fn invalidation_cutoff(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.invalidation_period.is_zero() {
            return None;
        }
        let period = time::Duration::try_from(self.invalidation_period).ok()?;
        now.checked_sub(period)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.default_scope, Scope::User);
        assert_eq!(config.default_bundle, "default");
        assert_eq!(config.default_refresh_minutes, 1440);
        assert_eq!(config.parse_depth, 3);
        assert_eq!(config.cookie_name, "stashid");
        assert_eq!(config.uri_index, "[index]");
        assert_eq!(config.bots.len(), 8);
        assert!(config.file_extensions.iter().any(|ext| ext == "html"));
        assert!(config.sweep_interval.is_none());
    }

    #[test]
    fn zero_refresh_never_expires() {
        let config = CacheConfig::default();
        let now = datetime!(2024-01-01 0:00 UTC);
        assert_eq!(config.expiry(Some(0), now), None);
        assert_eq!(config.expiry(Some(10), now), Some(datetime!(2024-01-01 0:10 UTC)));
        assert_eq!(config.expiry(None, now), Some(datetime!(2024-01-02 0:00 UTC)));
    }

    #[test]
    fn crawler_agents_are_bots() {
        let config = CacheConfig::default();
        assert!(config.is_bot(Some("Googlebot/2.1")));
        assert!(config.is_bot(Some("")));
        assert!(config.is_bot(None));
        assert!(!config.is_bot(Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0")));
    }

    #[test]
    fn invalidation_cutoff_only_with_period() {
        let now = datetime!(2024-01-01 0:10 UTC);
        let mut config = CacheConfig::default();
        assert_eq!(config.invalidation_cutoff(now), None);
        config.invalidation_period = Duration::from_secs(60);
        assert_eq!(config.invalidation_cutoff(now), Some(datetime!(2024-01-01 0:09 UTC)));
    }
}

//! Persistent cache key identity.
//!
//! A persisted variable is identified by `(site, bundle, session qualifier,
//! name)`. User-scoped keys carry the visitor's session token; site-scoped
//! keys share [`SITE_QUALIFIER`].

use time::OffsetDateTime;

use crate::domain::pattern::Pattern;
use crate::domain::types::{SITE_QUALIFIER, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub site_id: i64,
    pub bundle_id: i64,
    pub session_id: String,
    pub key_name: String,
}

impl CacheKey {
    /// `None` for local scope, which never reaches the persistent tier.
    pub fn for_scope(
        scope: Scope,
        session: &str,
        site_id: i64,
        bundle_id: i64,
        key_name: impl Into<String>,
    ) -> Option<Self> {
        let session_id = qualifier(scope, session)?;
        Some(Self {
            site_id,
            bundle_id,
            session_id,
            key_name: key_name.into(),
        })
    }
}

/// Session qualifier stored alongside a persisted key.
pub fn qualifier(scope: Scope, session: &str) -> Option<String> {
    match scope {
        Scope::Local => None,
        Scope::User => Some(session.to_string()),
        Scope::Site => Some(SITE_QUALIFIER.to_string()),
    }
}

/// Which key names a bulk delete or listing touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    Exact(String),
    /// Regular expression body, evaluated by the gateway.
    Regex(String),
    All,
}

impl KeyMatch {
    pub fn from_pattern(pattern: &Pattern) -> Self {
        match pattern {
            Pattern::Exact(name) => Self::Exact(name.clone()),
            Pattern::Regex { .. } => Self::Regex(pattern.regex_body().unwrap_or_default()),
        }
    }
}

/// Selection of persisted keys for deletes and listings.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    pub site_id: i64,
    pub bundle_id: Option<i64>,
    pub session_id: Option<String>,
    pub key: KeyMatch,
    /// Leave keys created after this instant untouched.
    pub created_before: Option<OffsetDateTime>,
}

/// A value to insert or update in the persistent tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub label: String,
    pub value: String,
    pub created: OffsetDateTime,
    pub expire: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_scope_has_no_persistent_key() {
        assert!(CacheKey::for_scope(Scope::Local, "abc", 1, 1, "x").is_none());
    }

    #[test]
    fn site_scope_ignores_session() {
        let a = CacheKey::for_scope(Scope::Site, "a", 1, 2, "x").unwrap();
        let b = CacheKey::for_scope(Scope::Site, "b", 1, 2, "x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.session_id, SITE_QUALIFIER);
    }

    #[test]
    fn user_scope_is_per_session() {
        let a = CacheKey::for_scope(Scope::User, "a", 1, 2, "x").unwrap();
        let b = CacheKey::for_scope(Scope::User, "b", 1, 2, "x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn regex_patterns_keep_their_body() {
        let pattern = Pattern::parse("#^foo_#").unwrap();
        assert_eq!(
            KeyMatch::from_pattern(&pattern),
            KeyMatch::Regex("^foo_".to_string())
        );
    }
}

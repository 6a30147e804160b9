//! Persistent-tier plumbing.
//!
//! - [`CacheConfig`]: tuning loaded from the `[stash]` settings section
//! - [`CacheKey`] / [`KeyFilter`]: identity and selection of persisted keys
//! - [`Sweeper`]: optional background expiry task
//!
//! ```toml
//! [stash]
//! default_scope = "user"
//! default_refresh_minutes = 1440
//! limit_bots = true
//! # ... see config.rs for all options
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod sweeper;

pub use config::CacheConfig;
pub(crate) use config::{
    DEFAULT_ADMIN_GROUP_ID, DEFAULT_BOTS, DEFAULT_BUNDLE, DEFAULT_COOKIE_NAME,
    DEFAULT_FILE_EXTENSIONS, DEFAULT_MAX_CALL_DEPTH, DEFAULT_PARSE_DEPTH,
    DEFAULT_PRUNE_PROBABILITY, DEFAULT_REFRESH_MINUTES, DEFAULT_SESSION_REFRESH_SECS,
    DEFAULT_URI_INDEX,
};
pub use keys::{CacheEntry, CacheKey, KeyFilter, KeyMatch, qualifier};
pub use sweeper::Sweeper;

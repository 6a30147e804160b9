//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CacheConfig, DEFAULT_ADMIN_GROUP_ID, DEFAULT_BOTS, DEFAULT_BUNDLE, DEFAULT_COOKIE_NAME,
    DEFAULT_FILE_EXTENSIONS, DEFAULT_MAX_CALL_DEPTH, DEFAULT_PARSE_DEPTH,
    DEFAULT_PRUNE_PROBABILITY, DEFAULT_REFRESH_MINUTES, DEFAULT_SESSION_REFRESH_SECS,
    DEFAULT_URI_INDEX,
};
use crate::domain::types::Scope;

mod cli;

pub use cli::{CliArgs, Command, CommonArgs, FlushArgs, Overrides, SweepArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stash";
const ENV_PREFIX: &str = "STASH";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub stash: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("stash.bots")
            .with_list_parse_key("stash.file_extensions")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(command) = cli.command.as_ref() {
        raw.apply_overrides(command.overrides());
        if let Command::Sweep(args) = command
            && let Some(seconds) = args.interval_seconds
        {
            raw.stash.sweep_interval_secs = Some(seconds);
        }
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    stash: RawStashSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            stash,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            stash: build_stash_settings(stash)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_stash_settings(stash: RawStashSettings) -> Result<CacheConfig, LoadError> {
    let default_scope = match stash.default_scope {
        Some(scope) => Scope::from_str(scope.trim())
            .map_err(|err| LoadError::invalid("stash.default_scope", err.to_string()))?,
        None => Scope::User,
    };

    let default_bundle = non_blank(stash.default_bundle, "stash.default_bundle")?
        .unwrap_or_else(|| DEFAULT_BUNDLE.to_string());

    let parse_depth = stash.parse_depth.unwrap_or(DEFAULT_PARSE_DEPTH);
    let max_call_depth = stash.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH);
    if max_call_depth == 0 {
        return Err(LoadError::invalid(
            "stash.max_call_depth",
            "must be greater than zero",
        ));
    }

    let prune_probability = stash
        .prune_probability
        .unwrap_or(DEFAULT_PRUNE_PROBABILITY);
    if !(0.0..=1.0).contains(&prune_probability) {
        return Err(LoadError::invalid(
            "stash.prune_probability",
            "must be between 0 and 1",
        ));
    }

    let session_refresh_secs = stash
        .session_refresh_secs
        .unwrap_or(DEFAULT_SESSION_REFRESH_SECS);
    if session_refresh_secs == 0 {
        return Err(LoadError::invalid(
            "stash.session_refresh_secs",
            "must be greater than zero",
        ));
    }

    let sweep_interval = match stash.sweep_interval_secs {
        Some(0) => {
            return Err(LoadError::invalid(
                "stash.sweep_interval_secs",
                "must be greater than zero",
            ));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let bots = stash
        .bots
        .map(clean_list)
        .unwrap_or_else(|| DEFAULT_BOTS.iter().map(|s| s.to_string()).collect());
    let file_extensions = stash
        .file_extensions
        .map(|list| {
            clean_list(list)
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_else(|| {
            DEFAULT_FILE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

    Ok(CacheConfig {
        default_scope,
        default_bundle,
        default_refresh_minutes: stash
            .default_refresh_minutes
            .unwrap_or(DEFAULT_REFRESH_MINUTES),
        parse_depth,
        max_call_depth,
        limit_bots: stash.limit_bots.unwrap_or(false),
        bots,
        prune_enabled: stash.prune_enabled.unwrap_or(true),
        prune_probability,
        session_refresh: Duration::from_secs(session_refresh_secs),
        cookie_name: non_blank(stash.cookie_name, "stash.cookie_name")?
            .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
        cookie_secret: stash.cookie_secret.unwrap_or_default(),
        invalidation_period: Duration::from_secs(stash.invalidation_period_secs.unwrap_or(0)),
        file_basepath: stash.file_basepath.filter(|p| !p.as_os_str().is_empty()),
        file_extensions,
        static_cache_dir: stash.static_cache_dir.filter(|p| !p.as_os_str().is_empty()),
        var_prefix: stash.var_prefix.filter(|p| !p.trim().is_empty()),
        uri_index: non_blank(stash.uri_index, "stash.uri_index")?
            .unwrap_or_else(|| DEFAULT_URI_INDEX.to_string()),
        include_query_string: stash.include_query_string.unwrap_or(false),
        admin_group_id: stash.admin_group_id.unwrap_or(DEFAULT_ADMIN_GROUP_ID),
        sweep_interval,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStashSettings {
    default_scope: Option<String>,
    default_bundle: Option<String>,
    default_refresh_minutes: Option<u64>,
    parse_depth: Option<usize>,
    max_call_depth: Option<usize>,
    limit_bots: Option<bool>,
    bots: Option<Vec<String>>,
    prune_enabled: Option<bool>,
    prune_probability: Option<f64>,
    session_refresh_secs: Option<u64>,
    cookie_name: Option<String>,
    cookie_secret: Option<String>,
    invalidation_period_secs: Option<u64>,
    file_basepath: Option<PathBuf>,
    file_extensions: Option<Vec<String>>,
    static_cache_dir: Option<PathBuf>,
    var_prefix: Option<String>,
    uri_index: Option<String>,
    include_query_string: Option<bool>,
    admin_group_id: Option<i64>,
    sweep_interval_secs: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>, key: &'static str) -> Result<Option<String>, LoadError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(LoadError::invalid(key, "must not be blank")),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

fn clean_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

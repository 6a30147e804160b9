use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Stash maintenance binary.
#[derive(Debug, Parser)]
#[command(name = "stash", version, about = "Stash variable cache maintenance")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STASH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(CommonArgs),
    /// Remove expired keys once and exit.
    Prune(CommonArgs),
    /// Delete persisted keys, for one site or all of them.
    Flush(FlushArgs),
    /// Prune expired keys on a fixed interval until interrupted.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FlushArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Restrict the flush to one site.
    #[arg(long = "site", value_name = "ID")]
    pub site: Option<i64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Override the sweep interval.
    #[arg(long = "interval-seconds", value_name = "SECONDS")]
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,
}

impl Command {
    pub fn overrides(&self) -> &Overrides {
        match self {
            Self::Migrate(args) | Self::Prune(args) => &args.overrides,
            Self::Flush(args) => &args.overrides,
            Self::Sweep(args) => &args.overrides,
        }
    }
}

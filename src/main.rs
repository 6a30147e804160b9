use std::{process, sync::Arc, time::Duration};

use stash::{
    application::{error::AppError, repos::VariablesRepo},
    cache::Sweeper,
    config,
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report().render();

    if dispatcher::has_been_set() {
        error!(error = %error, report = %report, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, report = %report, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let Some(command) = cli_args.command else {
        return Err(AppError::validation(
            "no command given; expected one of migrate, prune, flush, sweep",
        ));
    };

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Prune(_) => run_prune(&settings).await,
        config::Command::Flush(args) => run_flush(&settings, args.site).await,
        config::Command::Sweep(_) => run_sweep(&settings).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let pool = connect(settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("migrations applied");
    Ok(())
}

async fn run_prune(settings: &config::Settings) -> Result<(), AppError> {
    let repo = init_repository(settings).await?;
    let removed = repo.prune_expired(OffsetDateTime::now_utc()).await?;
    info!(removed, "expired keys pruned");
    Ok(())
}

async fn run_flush(settings: &config::Settings, site: Option<i64>) -> Result<(), AppError> {
    let repo = init_repository(settings).await?;
    let removed = repo.flush_cache(site).await?;
    info!(removed, site = ?site, "persistent cache flushed");
    Ok(())
}

async fn run_sweep(settings: &config::Settings) -> Result<(), AppError> {
    let repo: Arc<dyn VariablesRepo> = init_repository(settings).await?;
    let interval = settings
        .stash
        .sweep_interval
        .unwrap_or(DEFAULT_SWEEP_INTERVAL);

    let sweeper = Sweeper::new(repo, interval);
    sweeper.sweep_once().await?;
    let handle = sweeper.spawn();
    info!(interval_secs = interval.as_secs(), "sweeper running");

    let signal = tokio::signal::ctrl_c().await;
    handle.abort();
    signal.map_err(|err| AppError::from(InfraError::Signal(err)))?;

    info!("sweeper stopped");
    Ok(())
}

async fn connect(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = connect(settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    Ok(Arc::new(PostgresRepositories::new(pool)))
}

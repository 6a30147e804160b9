use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "stash_tier_hit_total",
            Unit::Count,
            "Variable reads served, labelled by the tier that answered."
        );
        describe_counter!(
            "stash_miss_total",
            Unit::Count,
            "Variable reads that missed every tier."
        );
        describe_counter!(
            "stash_persist_write_total",
            Unit::Count,
            "Persistent-tier writes, labelled insert, update, skip or delete."
        );
        describe_counter!(
            "stash_deferred_replay_total",
            Unit::Count,
            "Deferred tag invocations replayed."
        );
        describe_counter!(
            "stash_prune_total",
            Unit::Count,
            "Expiry sweeps run, labelled by what triggered them."
        );
        describe_histogram!(
            "stash_expand_ms",
            Unit::Milliseconds,
            "Macro expansion latency in milliseconds."
        );
    });
}

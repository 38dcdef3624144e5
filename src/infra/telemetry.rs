use std::io::IsTerminal;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::stats::{
    COMMIT_MS_METRIC, ITEM_EXPIRED_METRIC, ITEM_HIT_METRIC, ITEM_MISS_METRIC, READ_HITS_METRIC,
    WRITE_HITS_METRIC,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(true)
            .boxed(),
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

/// Register descriptions for the pool metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            READ_HITS_METRIC,
            Unit::Count,
            "Total number of item resolutions and existence checks."
        );
        describe_counter!(
            WRITE_HITS_METRIC,
            Unit::Count,
            "Total number of successful saves, deletes and clears."
        );
        describe_counter!(
            ITEM_HIT_METRIC,
            Unit::Count,
            "Total number of item resolutions that found a live record."
        );
        describe_counter!(
            ITEM_MISS_METRIC,
            Unit::Count,
            "Total number of item resolutions without a live record."
        );
        describe_counter!(
            ITEM_EXPIRED_METRIC,
            Unit::Count,
            "Total number of expired records dropped during resolution."
        );
        describe_histogram!(
            COMMIT_MS_METRIC,
            Unit::Milliseconds,
            "Deferred queue commit latency in milliseconds."
        );
    });
}

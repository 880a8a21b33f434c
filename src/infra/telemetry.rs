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
            "reverie_feed_cache_hit_total",
            Unit::Count,
            "Feed reads served from a warm cache."
        );
        describe_counter!(
            "reverie_feed_cache_stale_total",
            Unit::Count,
            "Feed reads served from a stale cache while a refresh runs."
        );
        describe_counter!(
            "reverie_feed_cache_cold_total",
            Unit::Count,
            "Feed reads that had to build the cache synchronously."
        );
        describe_counter!(
            "reverie_feed_rebuild_total",
            Unit::Count,
            "Completed feed cache rebuilds."
        );
        describe_counter!(
            "reverie_feed_rebuild_skipped_total",
            Unit::Count,
            "Background refreshes skipped because a rebuild was already running."
        );
        describe_counter!(
            "reverie_feed_rebuild_failed_total",
            Unit::Count,
            "Feed cache rebuilds that failed."
        );
        describe_counter!(
            "reverie_feed_invalidate_total",
            Unit::Count,
            "Feed cache invalidations."
        );
        describe_counter!(
            "reverie_signal_failed_total",
            Unit::Count,
            "Interest signals dropped after a store failure."
        );
        describe_counter!(
            "reverie_ranking_degraded_total",
            Unit::Count,
            "Rankings computed with recency only because context was unavailable."
        );
        describe_histogram!(
            "reverie_feed_rebuild_ms",
            Unit::Milliseconds,
            "Feed cache rebuild latency in milliseconds."
        );
    });
}

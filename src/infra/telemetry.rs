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

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pubcache_route_cache_hit_total",
            Unit::Count,
            "Total number of route cache hits."
        );
        describe_counter!(
            "pubcache_route_cache_miss_total",
            Unit::Count,
            "Total number of route cache misses."
        );
        describe_counter!(
            "pubcache_snapshot_commit_total",
            Unit::Count,
            "Total number of published snapshot commits."
        );
        describe_counter!(
            "pubcache_snapshot_clone_total",
            Unit::Count,
            "Total number of working copies cloned for writers."
        );
        describe_counter!(
            "pubcache_persist_failure_total",
            Unit::Count,
            "Total number of failed snapshot file writes."
        );
        describe_counter!(
            "pubcache_schema_repair_total",
            Unit::Count,
            "Total number of background reloads scheduled after content type drift."
        );
        describe_histogram!(
            "pubcache_notify_ms",
            Unit::Milliseconds,
            "Latency of applying a batch of change notifications in milliseconds."
        );
        describe_histogram!(
            "pubcache_persist_ms",
            Unit::Milliseconds,
            "Snapshot file write latency in milliseconds."
        );
        describe_histogram!(
            "pubcache_cold_start_ms",
            Unit::Milliseconds,
            "Cold start latency in milliseconds, labelled by source."
        );
    });
}

use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber.
///
/// Logs go to stderr; stdout is reserved for command output such as the
/// `status` report.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .compact()
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "outpost_cache_hit_total",
            Unit::Count,
            "Requests answered from a cache store, labelled by resource class."
        );
        describe_counter!(
            "outpost_cache_miss_total",
            Unit::Count,
            "Cache-first lookups that fell through to the network."
        );
        describe_counter!(
            "outpost_cache_fallback_total",
            Unit::Count,
            "Requests answered with a synthesized offline fallback."
        );
        describe_counter!(
            "outpost_cache_store_error_total",
            Unit::Count,
            "Cache store reads or writes that failed and were skipped."
        );
        describe_counter!(
            "outpost_eviction_reclaimed_bytes_total",
            Unit::Bytes,
            "Bytes removed from the dynamic store by eviction passes."
        );
        describe_counter!(
            "outpost_eviction_removed_total",
            Unit::Count,
            "Entries removed from the dynamic store by eviction passes."
        );
        describe_counter!(
            "outpost_outbox_delivered_total",
            Unit::Count,
            "Orders accepted by the order endpoint."
        );
        describe_counter!(
            "outpost_outbox_failed_total",
            Unit::Count,
            "Order delivery attempts that failed."
        );
        describe_gauge!(
            "outpost_outbox_pending",
            Unit::Count,
            "Orders still owned by the outbox after the last drain."
        );
        describe_histogram!(
            "outpost_sync_duration_ms",
            Unit::Milliseconds,
            "Outbox drain latency in milliseconds."
        );
    });
}

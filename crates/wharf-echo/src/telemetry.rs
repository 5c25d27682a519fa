//! # Telemetry Features
//!
//! Console logging is always on. OpenTelemetry export of traces and metrics
//! is opt-in through cargo features.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables log output and OpenTelemetry distributed tracing.
//! - `metrics`: Enables OpenTelemetry metrics for server events and pools.
//! - `otlp`: Enables the OTLP/gRPC exporter.
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of `tracing` or `metrics`.
//! - `otlp` and `stdout` can be enabled at the same time.
//!
//! ## Metrics behavior
//!
//! - `server_events` counts every server event, labelled by `server` and
//!   `category` (accept, reject, drop, read_error, ...).
//! - Pool gauges (`pool_workers`, `pool_active`, `pool_pending`,
//!   `pool_processed`, `pool_panicked`) are recorded on every statistics
//!   report, labelled by `pool`.
//!
//! ## Example usage
//!
//! Export traces and metrics over OTLP:
//!
//! ```bash
//! OTLP_ENDPOINT=https://collector:4317 cargo run --features tracing,metrics,otlp
//! ```
//!
//! Local stdout export only:
//!
//! ```bash
//! cargo run --features tracing,stdout
//! ```

// Disallow using `otlp` without `tracing` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wharf::{Stats, event::EventFn};

// OTLP-specific imports
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "otlp")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Gauge, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every exporter. Errors go to stderr since the
    /// subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("wharf")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Console output through `tracing_subscriber::fmt`, independent of the
    // `opentelemetry_stdout` exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Event hook for a server: logs each event and counts it.
pub fn event_fn(server: &'static str) -> EventFn {
    Arc::new(move |category: &str, _detail: &str| {
        #[cfg(feature = "tracing")]
        tracing::debug!(server, category, "{_detail}");
        record_event(server, category);
    })
}

/// Parses `OTLP_HEADERS` (`key=value,key=value`) into gRPC metadata.
#[cfg(feature = "otlp")]
fn get_metadata() -> anyhow::Result<MetadataMap> {
    use anyhow::Context;
    use tonic::metadata::MetadataKey;

    let mut map = MetadataMap::new();
    let Ok(raw) = std::env::var("OTLP_HEADERS") else {
        return Ok(map);
    };
    for pair in raw.split(',').filter(|pair| !pair.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("malformed OTLP header `{pair}`"))?;
        let key = MetadataKey::from_bytes(key.trim().as_bytes())
            .with_context(|| format!("invalid OTLP header name `{key}`"))?;
        map.insert(key, value.trim().parse().context("invalid OTLP header value")?);
    }
    Ok(map)
}

#[cfg(feature = "otlp")]
fn get_endpoint() -> anyhow::Result<(String, Compression)> {
    use anyhow::Context;
    use std::str::FromStr;

    let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;
    let raw = std::env::var("OTLP_COMPRESSION")
        .unwrap_or_else(|_| "gzip".to_string())
        .to_ascii_lowercase();
    Ok((endpoint, Compression::from_str(&raw)?))
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("wharf-echo")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = get_endpoint()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(get_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = get_endpoint()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(get_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static SERVER_EVENTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_WORKERS: OnceLock<Gauge<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_ACTIVE: OnceLock<Gauge<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_PENDING: OnceLock<Gauge<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_PROCESSED: OnceLock<Gauge<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_PANICKED: OnceLock<Gauge<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = SERVER_EVENTS.set(
        meter
            .u64_counter("server_events")
            .with_description("Server events by category")
            .build(),
    );

    let _ = POOL_WORKERS.set(
        meter
            .u64_gauge("pool_workers")
            .with_description("Live workers per pool")
            .build(),
    );

    let _ = POOL_ACTIVE.set(
        meter
            .u64_gauge("pool_active")
            .with_description("Workers running a unit")
            .build(),
    );

    let _ = POOL_PENDING.set(
        meter
            .u64_gauge("pool_pending")
            .with_description("Units queued but not yet started")
            .build(),
    );

    let _ = POOL_PROCESSED.set(
        meter
            .u64_gauge("pool_processed")
            .with_description("Units completed since the pool started")
            .build(),
    );

    let _ = POOL_PANICKED.set(
        meter
            .u64_gauge("pool_panicked")
            .with_description("Units that panicked since the pool started")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn record_event(server: &'static str, category: &str) {
    if let Some(counter) = SERVER_EVENTS.get() {
        counter.add(
            1,
            &[
                KeyValue::new("server", server),
                KeyValue::new("category", category.to_string()),
            ],
        );
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_event(_server: &'static str, _category: &str) {}

#[cfg(feature = "metrics")]
pub fn record_pool_stats(stats: &Stats) {
    let labels = [KeyValue::new("pool", stats.name.clone())];
    let record = |gauge: &OnceLock<Gauge<u64>>, value: u64| {
        if let Some(gauge) = gauge.get() {
            gauge.record(value, &labels);
        }
    };
    record(&POOL_WORKERS, stats.current as u64);
    record(&POOL_ACTIVE, stats.active as u64);
    record(&POOL_PENDING, stats.pending as u64);
    record(&POOL_PROCESSED, stats.processed);
    record(&POOL_PANICKED, stats.panicked);
}

#[cfg(not(feature = "metrics"))]
pub fn record_pool_stats(_stats: &Stats) {}

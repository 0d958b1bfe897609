//! Telemetry initialization for the Skerry daemon.
//!
//! Without the `telemetry` feature (or without an OTLP endpoint), logs go
//! to stdout through a plain `tracing-subscriber` fmt layer filtered by
//! `RUST_LOG` or the configured level. With the feature and an endpoint,
//! spans and log records are exported over OTLP with span-context
//! correlation.

use tracing_subscriber::EnvFilter;

/// Telemetry configuration resolved from TOML and environment.
#[derive(Debug, Clone, Default)]
#[allow(dead_code)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
    /// OTLP collector endpoint; empty disables export.
    pub otlp_endpoint: String,
    /// Custom OTLP headers in `key=value,key2=value2` format.
    pub otlp_headers: String,
    /// Service name reported in OTel resource attributes.
    pub service_name: String,
    /// Node ID hex string, attached as `service.instance.id`.
    pub instance_id: String,
}

/// Initialize the telemetry subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(config: &TelemetryConfig) {
    #[cfg(feature = "telemetry")]
    {
        if config.otlp_endpoint.is_empty() {
            init_console(&config.level);
        } else if let Err(e) = init_otel(config) {
            eprintln!("Failed to init OpenTelemetry: {e}, falling back to console");
            init_console(&config.level);
        }
    }

    #[cfg(not(feature = "telemetry"))]
    {
        init_console(&config.level);
    }
}

/// Console-only tracing subscriber (always available).
fn init_console(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Full OpenTelemetry initialization: traces + logs exported via OTLP.
#[cfg(feature = "telemetry")]
fn init_otel(config: &TelemetryConfig) -> anyhow::Result<()> {
    use opentelemetry::trace::TracerProvider;
    use opentelemetry::KeyValue;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig, WithTonicConfig};
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let service_name = if config.service_name.is_empty() {
        "skerryd".to_string()
    } else {
        config.service_name.clone()
    };

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", service_name))
        .with_attribute(KeyValue::new(
            "service.instance.id",
            config.instance_id.clone(),
        ))
        .build();

    let metadata = parse_otlp_headers(&config.otlp_headers);

    let mut span_builder = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint);
    if let Some(ref md) = metadata {
        span_builder = span_builder.with_metadata(md.clone());
    }
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_builder.build()?)
        .build();
    opentelemetry::global::set_tracer_provider(tracer_provider.clone());

    let mut log_builder = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint);
    if let Some(ref md) = metadata {
        log_builder = log_builder.with_metadata(md.clone());
    }
    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(log_builder.build()?)
        .build();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("skerryd")))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .init();

    tracing::info!(
        "OpenTelemetry initialized (OTLP endpoint: {})",
        config.otlp_endpoint
    );
    Ok(())
}

/// Graceful OTel shutdown — flushes pending spans and logs.
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    {
        // Providers flush on drop; nothing explicit to do here.
    }
}

/// Parse OTLP headers from a `key=value,key2=value2` string.
#[cfg(feature = "telemetry")]
fn parse_otlp_headers(raw: &str) -> Option<tonic::metadata::MetadataMap> {
    if raw.is_empty() {
        return None;
    }

    let mut map = tonic::metadata::MetadataMap::new();
    for pair in raw.split(',') {
        if let Some((k, v)) = pair.split_once('=') {
            if let (Ok(key), Ok(val)) = (
                k.trim()
                    .parse::<tonic::metadata::MetadataKey<tonic::metadata::Ascii>>(),
                v.trim()
                    .parse::<tonic::metadata::MetadataValue<tonic::metadata::Ascii>>(),
            ) {
                map.insert(key, val);
            }
        }
    }

    Some(map)
}

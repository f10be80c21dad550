use crate::model::Direction;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use serde::Deserialize;
use std::time::{Duration, Instant};

const METER: &str = "mcp-shark";

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: default_transport(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_transport() -> String {
    "http".into()
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".into()
}

/// Build and register a global meter provider.
/// For gRPC transport, requires an active tokio runtime context.
pub fn init_meter_provider(config: &MetricsConfig) -> Option<SdkMeterProvider> {
    if !config.enabled {
        return None;
    }

    let resource = Resource::builder_empty()
        .with_attributes([KeyValue::new("service.name", METER)])
        .build();

    let exporter = match config.transport.as_str() {
        "grpc" => opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_timeout(Duration::from_secs(5))
            .build(),
        _ => opentelemetry_otlp::MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(&config.endpoint)
            .with_timeout(Duration::from_secs(5))
            .build(),
    };
    let exporter = exporter
        .map_err(|e| log::warn!("metrics {} exporter: {e}", config.transport))
        .ok()?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Some(provider)
}

/// Count one persisted packet. A no-op until a provider is registered.
pub fn record_packet(direction: Direction) {
    opentelemetry::global::meter(METER)
        .u64_counter("mcp_shark_packets_total")
        .build()
        .add(1, &[KeyValue::new("direction", direction.as_str())]);
}

/// Count one response by whether it closed a conversation.
pub fn record_correlation(matched: bool) {
    let outcome = if matched { "matched" } else { "uncorrelated" };
    opentelemetry::global::meter(METER)
        .u64_counter("mcp_shark_responses_total")
        .build()
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

pub fn record_query_metrics(tool: &str, start: Instant) {
    let meter = opentelemetry::global::meter(METER);
    meter
        .u64_counter("mcp_shark_queries_total")
        .build()
        .add(1, &[KeyValue::new("tool", tool.to_string())]);
    meter
        .f64_histogram("mcp_shark_query_duration_seconds")
        .build()
        .record(
            start.elapsed().as_secs_f64(),
            &[KeyValue::new("tool", tool.to_string())],
        );
}

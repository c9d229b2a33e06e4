pub mod aggregator;
pub mod cluster;
pub mod config;
pub mod edge_set;
pub mod error;
pub mod fire;
pub mod message;
pub mod metrics;
pub mod partition;
pub mod sample_graph;
pub mod stitch;
pub mod transport;
pub mod worker;

pub use error::*;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub type VertexId = u64;
pub type Rank = usize;

pub const AGGREGATOR_RANK: Rank = 0;

/// Install the global subscriber: `RUST_LOG` filter (default `info`) and a
/// fmt layer. With the `otlp` feature spans are also exported over OTLP/HTTP
/// to `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://jaeger:4318/v1/traces`).
pub fn init_tracing(service: &str) -> Result<(), FireError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otlp")]
    let registry = registry.with(otlp_layer(service)?);
    #[cfg(not(feature = "otlp"))]
    let _ = service;

    registry
        .try_init()
        .map_err(|e| FireError::Other(format!("tracing already initialised: {}", e)))
}

#[cfg(feature = "otlp")]
fn otlp_layer<S>(
    service: &str,
) -> Result<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>, FireError>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_otlp::{Protocol, WithExportConfig};
    use opentelemetry_sdk::{Resource, trace as sdktrace};

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://jaeger:4318/v1/traces".to_string());
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| FireError::Other(format!("failed to build OTLP exporter: {}", e)))?;
    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", service.to_string())])
        .build();
    let provider = sdktrace::SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer(service.to_string());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

//! Distributed tracing for keystone: OpenTelemetry span export, W3C context
//! propagation, and a Tower layer that turns every HTTP request into a span.
//!
//! # Usage
//!
//! ```rust,ignore
//! use keystone_observability::{init_observability, ObservabilityConfig};
//!
//! let config = ObservabilityConfig::new("keystone").with_endpoint("http://otel-collector:4317");
//! let (guard, trace_layer) = init_observability(&config);
//! // keep `guard` alive for the process lifetime; `None` if tracing_enabled is false
//!
//! let app = axum::Router::new().layer(trace_layer);
//! ```

pub mod config;
pub mod middleware;
pub mod propagation;
pub mod tracing_setup;

pub use config::{LogFormat, ObservabilityConfig, OtlpProtocol, PropagationFormat};
pub use middleware::OtelTraceLayer;
pub use propagation::install_propagator;
pub use tracing_setup::{init_tracing, OtelGuard};

/// Install the W3C propagator, initialise the tracing subscriber (if
/// `config.tracing_enabled`), and build the per-request OTel span layer.
///
/// Call once at startup. The returned [`OtelGuard`] must be held for the
/// process lifetime — dropping it flushes and shuts down the exporter — and
/// the returned [`OtelTraceLayer`] mounts directly on the outer `axum::Router`
/// alongside tower-http's own `TraceLayer` and `keystone-metrics`'s
/// `PrometheusLayer`.
pub fn init_observability(config: &ObservabilityConfig) -> (Option<OtelGuard>, OtelTraceLayer) {
    propagation::install_propagator(config);

    let guard = if config.tracing_enabled {
        Some(tracing_setup::init_tracing(config))
    } else {
        None
    };

    (guard, OtelTraceLayer::new(config.capture_headers.clone()))
}

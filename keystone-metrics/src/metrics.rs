use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Which request paths to exclude from per-request metrics (health checks,
/// the metrics endpoint itself).
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub exclude_paths: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            exclude_paths: vec!["/metrics".into(), "/health".into()],
        }
    }
}

struct Collectors {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    in_flight: IntGauge,
}

static COLLECTORS: OnceLock<Collectors> = OnceLock::new();

fn collectors() -> &'static Collectors {
    COLLECTORS.get_or_init(|| {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new(
                "keystone_http_requests_total",
                "Total HTTP requests processed, by method/path/status",
            ),
            &["method", "path", "status"],
        )
        .expect("valid metric");

        let request_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "keystone_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("valid metric");

        let in_flight = IntGauge::new(
            "keystone_http_requests_in_flight",
            "HTTP requests currently being handled",
        )
        .expect("valid metric");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register requests_total");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("register request_duration");
        registry
            .register(Box::new(in_flight.clone()))
            .expect("register in_flight");

        Collectors {
            registry,
            requests_total,
            request_duration,
            in_flight,
        }
    })
}

/// The shared registry, for components outside this crate to register
/// additional collectors against (e.g. permission cache hit rate, event
/// hub queue depth).
pub fn registry() -> &'static Registry {
    &collectors().registry
}

pub fn inc_in_flight() {
    collectors().in_flight.inc();
}

pub fn dec_in_flight() {
    collectors().in_flight.dec();
}

pub fn record_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let c = collectors();
    c.requests_total
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    c.request_duration
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Render the registry in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let metric_families = collectors().registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&metric_families, &mut buf)
        .expect("metrics encode to valid utf8");
    String::from_utf8(buf).expect("prometheus text encoder emits utf8")
}

//! Prometheus metrics for keystone: a `/metrics` handler plus a Tower layer
//! that records request count, latency, and in-flight gauge for every HTTP
//! request that passes through it.
//!
//! Mount [`PrometheusLayer`] on the outer router and [`metrics_handler`] at
//! `GET /metrics` (§6). Other crates (the permission cache, the event hub)
//! register their own gauges against [`registry()`] so everything is
//! exported from a single `/metrics` scrape.

pub mod handler;
pub mod layer;
pub mod metrics;

pub use handler::metrics_handler;
pub use layer::PrometheusLayer;
pub use metrics::{registry, MetricsConfig};

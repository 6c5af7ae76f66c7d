//! Observability for Pawhouse: a process-wide Prometheus registry and the
//! HTTP exporter that serves it on the worker metrics listener.

pub mod exporter;
pub mod metrics;

//! Prometheus metrics for reconcilers, backends and webhooks

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Operator metric families
#[derive(Clone)]
pub struct Metrics {
    pub reconcile_total: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub backend_calls_total: IntCounterVec,
    pub admission_total: IntCounterVec,
    pub conversion_total: IntCounterVec,
}

impl Metrics {
    /// Create metric families without registering them
    pub fn new() -> Result<Self> {
        Ok(Self {
            reconcile_total: counter(
                "virtualization_reconcile_total",
                "Reconcile passes by kind and result",
                &["kind", "result"],
            )?,
            reconcile_duration: HistogramVec::new(
                HistogramOpts::new(
                    "virtualization_reconcile_duration_seconds",
                    "Duration of reconcile passes",
                )
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
                &["kind"],
            )
            .map_err(metric_error)?,
            backend_calls_total: counter(
                "virtualization_backend_calls_total",
                "Collaborator calls by backend, operation and result",
                &["backend", "operation", "result"],
            )?,
            admission_total: counter(
                "virtualization_admission_total",
                "Admission reviews by kind and decision",
                &["kind", "allowed"],
            )?,
            conversion_total: counter(
                "virtualization_conversion_total",
                "Conversion reviews by result",
                &["result"],
            )?,
        })
    }

    /// Register every family into `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.reconcile_total.clone()),
            Box::new(self.reconcile_duration.clone()),
            Box::new(self.backend_calls_total.clone()),
            Box::new(self.admission_total.clone()),
            Box::new(self.conversion_total.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(metric_error)?;
        }
        Ok(())
    }

    pub fn observe_reconcile(&self, kind: &str, ok: bool, elapsed: Duration) {
        let result = if ok { "success" } else { "error" };
        self.reconcile_total.with_label_values(&[kind, result]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_backend<T>(&self, backend: &str, operation: &str, outcome: &Result<T>) {
        let result = if outcome.is_ok() { "success" } else { "error" };
        self.backend_calls_total
            .with_label_values(&[backend, operation, result])
            .inc();
    }
}

fn counter(name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels).map_err(metric_error)
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metric error: {}", e))
}

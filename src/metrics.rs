//! C9 (metrics half): Prometheus observations in the `mcrt` namespace, plus
//! ambient reconcile-loop metrics (`reconciliations_total`,
//! `controller_reconcile_duration_seconds`, `controller_reconciliation_errors_total`).

use prometheus::{
    exponential_buckets, opts, GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    Registry,
};
use tokio::time::Instant;

const NAMESPACE: &str = "mcrt";

#[derive(Clone)]
pub struct Metrics {
    /// `mcrt_managedcertificate_status_count{status}` gauge.
    pub status_count: GaugeVec,
    /// `mcrt_sslcertificate_backend_error_total` counter.
    pub backend_errors: IntCounter,
    /// `mcrt_sslcertificate_quota_error_total` counter.
    pub quota_errors: IntCounter,
    /// `mcrt_sslcertificate_creation_latency_seconds` histogram.
    pub creation_latency: HistogramVec,
    /// `mcrt_sslcertificate_binding_latency_seconds` histogram.
    pub binding_latency: HistogramVec,
    /// `mcrt_queue_length{queue}` gauge.
    pub queue_length: IntGaugeVec,

    /// Ambient reconcile-loop metrics.
    pub reconciliations: IntCounter,
    pub reconcile_failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let latency_buckets = exponential_buckets(1.0, 1.3, 10).expect("valid bucket parameters");

        Metrics {
            status_count: GaugeVec::new(
                opts!(
                    format!("{NAMESPACE}_managedcertificate_status_count"),
                    "Number of ManagedCertificates currently in each certificateStatus"
                ),
                &["status"],
            )
            .unwrap(),
            backend_errors: IntCounter::new(
                format!("{NAMESPACE}_sslcertificate_backend_error_total"),
                "Count of transient Provider backend errors",
            )
            .unwrap(),
            quota_errors: IntCounter::new(
                format!("{NAMESPACE}_sslcertificate_quota_error_total"),
                "Count of Provider quota-exceeded errors",
            )
            .unwrap(),
            creation_latency: HistogramVec::new(
                prometheus::histogram_opts!(
                    format!("{NAMESPACE}_sslcertificate_creation_latency_seconds"),
                    "Time from ManagedCertificate creation to first SslCertificate Create call",
                    latency_buckets.clone()
                ),
                &[],
            )
            .unwrap(),
            binding_latency: HistogramVec::new(
                prometheus::histogram_opts!(
                    format!("{NAMESPACE}_sslcertificate_binding_latency_seconds"),
                    "Time from ManagedCertificate creation to the pre-shared-cert annotation binding",
                    latency_buckets
                ),
                &[],
            )
            .unwrap(),
            queue_length: IntGaugeVec::new(
                opts!(
                    format!("{NAMESPACE}_queue_length"),
                    "Number of pending items in a work queue"
                ),
                &["queue"],
            )
            .unwrap(),
            reconciliations: IntCounter::new("reconciliations_total", "reconciliations").unwrap(),
            reconcile_failures: IntCounterVec::new(
                opts!(
                    "controller_reconciliation_errors_total",
                    "reconciliation errors"
                ),
                &["instance", "error"],
            )
            .unwrap(),
            reconcile_duration: HistogramVec::new(
                prometheus::histogram_opts!(
                    "controller_reconcile_duration_seconds",
                    "The duration of reconcile to complete in seconds",
                )
                .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
                &["instance"],
            )
            .unwrap(),
        }
    }

    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.status_count.clone()))?;
        registry.register(Box::new(self.backend_errors.clone()))?;
        registry.register(Box::new(self.quota_errors.clone()))?;
        registry.register(Box::new(self.creation_latency.clone()))?;
        registry.register(Box::new(self.binding_latency.clone()))?;
        registry.register(Box::new(self.queue_length.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.reconcile_failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        Ok(self)
    }

    pub fn count_and_measure(&self, instance: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: instance.to_string(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Smart duration measurer: relies on `Drop` to calculate duration and
/// register the observation in the histogram.
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_name_collisions() {
        let registry = Registry::new();
        Metrics::new().register(&registry).unwrap();
    }

    #[test]
    fn latency_buckets_have_ten_entries_per_the_spec() {
        let buckets = exponential_buckets(1.0, 1.3, 10).unwrap();
        assert_eq!(buckets.len(), 10);
        assert!((buckets[0] - 1.0).abs() < 1e-9);
    }
}

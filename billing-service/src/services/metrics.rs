//! Metrics module for billing-service.
//! Provides Prometheus metrics for renewal runs and webhook delivery.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Billing runs counter
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Renewed subscriptions counter
pub static RENEWALS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook delivery counter
pub static WEBHOOK_DELIVERIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_runs_total",
                "Total billing runs by trigger type and status"
            ),
            &["run_type", "status"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    RENEWALS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_renewals_total",
                "Total per-subscription renewal outcomes"
            ),
            &["outcome"]
        )
        .expect("Failed to register RENEWALS_TOTAL")
    });

    WEBHOOK_DELIVERIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_webhook_deliveries_total",
                "Total webhook delivery outcomes"
            ),
            &["outcome"]
        )
        .expect("Failed to register WEBHOOK_DELIVERIES_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by operation"),
            &["operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });
}

/// Record a billing run completion.
pub fn record_billing_run(run_type: &str, status: &str) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[run_type, status]).inc();
    }
}

/// Record a per-subscription renewal outcome.
pub fn record_renewal(outcome: &str) {
    if let Some(counter) = RENEWALS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a webhook delivery outcome.
pub fn record_webhook_delivery(outcome: &str) {
    if let Some(counter) = WEBHOOK_DELIVERIES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Encode current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

//! Services module for billing-service.

pub mod billing;
pub mod database;
pub mod metrics;
pub mod scheduler;
pub mod webhook;

pub use billing::{BillingRunSummary, BillingRunner, BillingStore, EventPublisher, RenewalOutcome};
pub use database::Database;
pub use metrics::{
    get_metrics, init_metrics, record_billing_run, record_error, record_renewal,
    record_webhook_delivery,
};
pub use scheduler::run_billing_schedule;
pub use webhook::{
    run_dispatch_workers, run_renewal_listener, DeliveryResult, WebhookConfigStore,
    WebhookDispatcher,
};

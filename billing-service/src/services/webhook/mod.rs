//! Webhook notification pipeline.
//!
//! Renewal events flow from the in-process event bus onto a dedicated
//! delivery queue, drained by a pool of dispatch workers. Delivery failures
//! never reach back into billing.

pub mod dispatcher;
pub mod listener;

pub use dispatcher::{
    run_dispatch_workers, DeliveryResult, WebhookConfigStore, WebhookDispatcher,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
pub use listener::run_renewal_listener;

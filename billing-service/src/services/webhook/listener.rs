//! Event-bus listener feeding the webhook delivery queue.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{DispatchJob, SubscriptionRenewed};

/// Forward renewal events onto the delivery queue until the bus closes.
///
/// Registered explicitly at startup; there is no convention-based listener
/// discovery.
pub async fn run_renewal_listener(
    mut events: mpsc::Receiver<SubscriptionRenewed>,
    queue: mpsc::Sender<DispatchJob>,
) {
    while let Some(event) = events.recv().await {
        debug!(
            subscription_id = %event.subscription_id,
            billing_history_id = %event.billing_history_id,
            "Queueing webhook dispatch for renewal"
        );
        let job = DispatchJob::from_event(&event);
        if queue.send(job).await.is_err() {
            warn!("Delivery queue closed, dropping renewal notification");
            break;
        }
    }
    info!("Renewal listener stopped");
}

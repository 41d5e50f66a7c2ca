//! Webhook delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryConfig, RetryError};
use service_core::utils::signature::sign_payload;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::models::{DispatchJob, WebhookConfig};
use crate::services::metrics::record_webhook_delivery;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Read-only lookup of a user's webhook endpoint.
#[async_trait]
pub trait WebhookConfigStore: Send + Sync {
    async fn active_webhook_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WebhookConfig>, AppError>;
}

/// Terminal outcome of one dispatch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// The user has no active webhook config; nothing to do.
    Skipped,
}

/// Delivers signed renewal notifications to user-configured endpoints.
pub struct WebhookDispatcher {
    client: Client,
    configs: Arc<dyn WebhookConfigStore>,
    retry: RetryConfig,
}

impl WebhookDispatcher {
    pub fn new(
        configs: Arc<dyn WebhookConfigStore>,
        request_timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            configs,
            retry,
        })
    }

    /// Deliver one renewal notification.
    ///
    /// Transient endpoint failures (429, 5xx, network, timeout) are retried
    /// with backoff; other 4xx responses are treated as permanently wrong
    /// payload/config and never retried. Exhausting the attempt limit is a
    /// terminal failure surfaced as `DeliveryFailed`.
    #[instrument(
        skip(self, job),
        fields(
            subscription_id = %job.subscription_id,
            user_id = %job.user_id,
            billing_history_id = %job.billing_history_id,
        )
    )]
    pub async fn dispatch(&self, job: &DispatchJob) -> Result<DeliveryResult, AppError> {
        let Some(config) = self.configs.active_webhook_config(job.user_id).await? else {
            debug!("No active webhook config, skipping delivery");
            record_webhook_delivery("skipped");
            return Ok(DeliveryResult::Skipped);
        };

        let body = serde_json::to_string(&job.payload).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize payload: {}", e))
        })?;

        let delivery = retry_with_backoff(&self.retry, "webhook_delivery", || {
            self.attempt(&config, &body)
        })
        .await;

        match delivery {
            Ok(()) => {
                record_webhook_delivery("delivered");
                info!(url = %config.url, "Webhook delivered");
                Ok(DeliveryResult::Delivered)
            }
            Err(e) => {
                record_webhook_delivery("failed");
                error!(url = %config.url, error = %e, "Webhook delivery failed terminally");
                Err(e)
            }
        }
    }

    /// One signed delivery attempt. Each attempt is signed fresh so the
    /// timestamp header stays current across retries.
    async fn attempt(&self, config: &WebhookConfig, body: &str) -> Result<(), RetryError> {
        let timestamp = Utc::now().timestamp();
        let signature = sign_payload(&config.secret, timestamp, body)
            .map_err(|e| RetryError::Permanent(AppError::InternalError(e)))?;

        let response = self
            .client
            .post(&config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .body(body.to_string())
            .send()
            .await;

        match response {
            Ok(resp) => classify_status(resp.status()),
            Err(e) => Err(RetryError::Transient(AppError::DeliveryFailed(format!(
                "request error: {}",
                e
            )))),
        }
    }
}

/// Map an endpoint response to a delivery decision: 2xx success, 429/5xx
/// transient, anything else permanent.
fn classify_status(status: StatusCode) -> Result<(), RetryError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(RetryError::Transient(AppError::DeliveryFailed(format!(
            "endpoint returned {}",
            status
        ))));
    }
    Err(RetryError::Permanent(AppError::DeliveryFailed(format!(
        "endpoint rejected delivery: {}",
        status
    ))))
}

/// Drain the delivery queue with a pool of dispatch workers.
///
/// Workers run until the queue closes. A failed delivery is already logged
/// and counted by the dispatcher; the worker moves on to the next job.
pub async fn run_dispatch_workers(
    queue: mpsc::Receiver<DispatchJob>,
    dispatcher: Arc<WebhookDispatcher>,
    workers: usize,
) {
    let queue = Arc::new(Mutex::new(queue));
    let mut handles = Vec::with_capacity(workers.max(1));

    for worker_id in 0..workers.max(1) {
        let queue = queue.clone();
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut queue = queue.lock().await;
                    queue.recv().await
                };
                let Some(job) = job else {
                    break;
                };
                // Terminal failures are absorbed here; they never re-trigger
                // billing.
                let _ = dispatcher.dispatch(&job).await;
            }
            debug!(worker_id = worker_id, "Dispatch worker stopped");
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    info!("Webhook dispatch workers stopped");
}

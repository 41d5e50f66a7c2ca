//! Webhook delivery tests.
//!
//! Run against a throwaway axum endpoint bound to an ephemeral port, so the
//! full request path (signing, headers, retry classification) is exercised
//! without external infrastructure.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use billing_service::models::{BillingCycle, Currency, DispatchJob, SubscriptionRenewed};
use billing_service::services::webhook::{
    WebhookDispatcher, DeliveryResult, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use chrono::NaiveDate;
use common::{make_webhook_config, StaticConfigStore};
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use service_core::utils::signature::verify_payload;
use uuid::Uuid;

const SECRET: &str = "whsec_dispatch_test";

/// How the endpoint answers each request, in arrival order.
#[derive(Clone, Copy)]
enum Behavior {
    AlwaysOk,
    /// Respond 500 for the first `n` requests, then 200.
    FailTimes(u32),
    AlwaysNotFound,
    AlwaysServerError,
}

struct ReceivedRequest {
    signature: String,
    timestamp: i64,
    body: String,
}

struct RecordingEndpoint {
    behavior: Behavior,
    hits: AtomicU32,
    received: Mutex<Vec<ReceivedRequest>>,
}

async fn hook_handler(
    State(state): State<Arc<RecordingEndpoint>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    state.received.lock().unwrap().push(ReceivedRequest {
        signature: headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        timestamp: headers
            .get(TIMESTAMP_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        body,
    });

    match state.behavior {
        Behavior::AlwaysOk => StatusCode::OK,
        Behavior::FailTimes(n_failures) if n < n_failures => StatusCode::INTERNAL_SERVER_ERROR,
        Behavior::FailTimes(_) => StatusCode::OK,
        Behavior::AlwaysNotFound => StatusCode::NOT_FOUND,
        Behavior::AlwaysServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Spawn the endpoint on an ephemeral port and return its state and URL.
async fn spawn_endpoint(behavior: Behavior) -> (Arc<RecordingEndpoint>, String) {
    let state = Arc::new(RecordingEndpoint {
        behavior,
        hits: AtomicU32::new(0),
        received: Mutex::new(Vec::new()),
    });

    let router = Router::new()
        .route("/hook", post(hook_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test endpoint");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (state, format!("http://{}/hook", addr))
}

fn sample_job() -> DispatchJob {
    let event = SubscriptionRenewed::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Streaming Plus".to_string(),
        4990,
        Currency::Brl,
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        BillingCycle::Monthly.next_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
    );
    DispatchJob::from_event(&event)
}

fn test_retry_config(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        add_jitter: false,
    }
}

fn dispatcher(store: StaticConfigStore, max_retries: u32) -> WebhookDispatcher {
    WebhookDispatcher::new(
        Arc::new(store),
        Duration::from_secs(2),
        test_retry_config(max_retries),
    )
    .expect("Failed to build dispatcher")
}

#[tokio::test]
async fn delivers_signed_payload() {
    let (endpoint, url) = spawn_endpoint(Behavior::AlwaysOk).await;
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(job.user_id, &url, SECRET, true)),
        3,
    );

    let result = dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(result, DeliveryResult::Delivered);
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);

    let received = endpoint.received.lock().unwrap();
    let request = &received[0];
    assert!(
        verify_payload(SECRET, request.timestamp, &request.body, &request.signature).unwrap(),
        "signature must verify against the delivered body"
    );

    // The body is the event's flat-map form.
    let payload: HashMap<String, String> = serde_json::from_str(&request.body).unwrap();
    assert_eq!(payload, job.payload);
    assert_eq!(payload["amount_cents"], "4990");

    // The receiver can rebuild the event losslessly.
    let decoded = SubscriptionRenewed::from_flat_map(&payload).unwrap();
    assert_eq!(decoded.subscription_id, job.subscription_id);
    assert_eq!(decoded.billing_history_id, job.billing_history_id);
}

#[tokio::test]
async fn retries_server_errors_until_success() {
    // Endpoint fails three times then recovers; delivery must succeed with
    // exactly one successful request recorded.
    let (endpoint, url) = spawn_endpoint(Behavior::FailTimes(3)).await;
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(job.user_id, &url, SECRET, true)),
        5,
    );

    let result = dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(result, DeliveryResult::Delivered);
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn client_error_is_terminal_and_not_retried() {
    let (endpoint, url) = spawn_endpoint(Behavior::AlwaysNotFound).await;
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(job.user_id, &url, SECRET, true)),
        5,
    );

    let result = dispatcher.dispatch(&job).await;

    assert!(matches!(result, Err(AppError::DeliveryFailed(_))));
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn persistent_server_errors_exhaust_the_attempt_limit() {
    let (endpoint, url) = spawn_endpoint(Behavior::AlwaysServerError).await;
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(job.user_id, &url, SECRET, true)),
        2,
    );

    let result = dispatcher.dispatch(&job).await;

    assert!(matches!(result, Err(AppError::DeliveryFailed(_))));
    // initial attempt + two retries
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_config_is_a_noop() {
    let job = sample_job();
    let dispatcher = dispatcher(StaticConfigStore::empty(), 3);

    let result = dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(result, DeliveryResult::Skipped);
}

#[tokio::test]
async fn inactive_config_is_a_noop() {
    let (endpoint, url) = spawn_endpoint(Behavior::AlwaysOk).await;
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(job.user_id, &url, SECRET, false)),
        3,
    );

    let result = dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(result, DeliveryResult::Skipped);
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_endpoint_is_transient_and_exhausts_attempts() {
    // Nothing is listening on this port.
    let job = sample_job();
    let dispatcher = dispatcher(
        StaticConfigStore::with(make_webhook_config(
            job.user_id,
            "http://127.0.0.1:1/hook",
            SECRET,
            true,
        )),
        1,
    );

    let result = dispatcher.dispatch(&job).await;

    assert!(matches!(result, Err(AppError::DeliveryFailed(_))));
}

//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use service_core::retry::RetryConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::config::BillingConfig;
use crate::models::{DispatchJob, SubscriptionRenewed};
use crate::services::{
    init_metrics, run_billing_schedule, run_dispatch_workers, run_renewal_listener, BillingRunner,
    Database, WebhookDispatcher,
};

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "billing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "billing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = crate::services::get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    config: BillingConfig,
    db: Arc<Database>,
    runner: Arc<BillingRunner>,
    dispatcher: Arc<WebhookDispatcher>,
    events_rx: mpsc::Receiver<SubscriptionRenewed>,
    queue_tx: mpsc::Sender<DispatchJob>,
    queue_rx: mpsc::Receiver<DispatchJob>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        // Event bus and delivery queue. The webhook queue is dedicated:
        // delivery latency never blocks billing.
        let (events_tx, events_rx) =
            mpsc::channel::<SubscriptionRenewed>(config.webhook.queue_capacity);
        let (queue_tx, queue_rx) = mpsc::channel::<DispatchJob>(config.webhook.queue_capacity);

        let runner = Arc::new(BillingRunner::new(
            db.clone(),
            Arc::new(events_tx),
            config.scheduler.batch_concurrency,
        ));

        let dispatcher = Arc::new(WebhookDispatcher::new(
            db.clone(),
            Duration::from_secs(config.webhook.request_timeout_secs),
            RetryConfig::with_max_retries(config.webhook.max_retries),
        )?);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            config,
            db,
            runner,
            dispatcher,
            events_rx,
            queue_tx,
            queue_rx,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the billing runner, e.g. for a manual operational trigger.
    pub fn runner(&self) -> Arc<BillingRunner> {
        self.runner.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.db.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        // Webhook pipeline: the renewal listener is registered against the
        // event bus here, explicitly, before any billing run can publish.
        tokio::spawn(run_renewal_listener(self.events_rx, self.queue_tx));
        tokio::spawn(run_dispatch_workers(
            self.queue_rx,
            self.dispatcher,
            self.config.webhook.workers,
        ));

        let schedule = run_billing_schedule(
            self.runner,
            Duration::from_secs(self.config.scheduler.interval_secs),
            self.config.scheduler.run_on_startup,
        );

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            interval_secs = self.config.scheduler.interval_secs,
            "Service ready"
        );

        tokio::select! {
            result = axum::serve(self.listener, router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            _ = schedule => {
                tracing::error!("Billing schedule stopped unexpectedly");
            }
        }

        Ok(())
    }
}

//! Database service for billing-service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    AuditContext, BillingCycle, BillingHistory, BillingRun, BillingRunStatus, BillingRunType,
    CreateSubscription, Subscription, WebhookConfig,
};
use crate::services::billing::{BillingStore, RenewalOutcome};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::webhook::WebhookConfigStore;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, name, price_cents, currency, \
     billing_cycle, next_billing_date, status, category, created_by, updated_by, deleted_by, \
     deleted_utc, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Create a new subscription.
    #[instrument(skip(self, input, audit), fields(user_id = %input.user_id))]
    pub async fn create_subscription(
        &self,
        input: &CreateSubscription,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        input.validate_as_of(Utc::now().date_naive())?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, name, price_cents, currency, billing_cycle, next_billing_date, category, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(input.price_cents)
        .bind(input.currency.as_str())
        .bind(input.billing_cycle.as_str())
        .bind(input.next_billing_date)
        .bind(&input.category)
        .bind(audit.acting_user)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok(subscription)
    }

    /// Get a subscription by ID. Soft-deleted rows are invisible.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1 AND deleted_utc IS NULL
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// List a user's subscriptions.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions_for_user"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND deleted_utc IS NULL
            ORDER BY created_utc
            "#,
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// ACTIVE -> PAUSED.
    pub async fn pause_subscription(
        &self,
        subscription_id: Uuid,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        self.mutate_subscription(subscription_id, audit, "pause_subscription", |sub| sub.pause())
            .await
    }

    /// PAUSED -> ACTIVE.
    pub async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        self.mutate_subscription(subscription_id, audit, "reactivate_subscription", |sub| {
            sub.reactivate()
        })
        .await
    }

    /// ACTIVE or PAUSED -> CANCELLED (terminal).
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        self.mutate_subscription(subscription_id, audit, "cancel_subscription", |sub| {
            sub.cancel()
        })
        .await
    }

    /// Change the price charged on future renewals. Past ledger rows keep the
    /// amount that was actually charged.
    pub async fn change_subscription_price(
        &self,
        subscription_id: Uuid,
        price_cents: i64,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        self.mutate_subscription(subscription_id, audit, "change_subscription_price", |sub| {
            sub.change_price(price_cents)
        })
        .await
    }

    /// Change the billing cycle applied on future renewals.
    pub async fn change_subscription_cycle(
        &self,
        subscription_id: Uuid,
        cycle: BillingCycle,
        audit: &AuditContext,
    ) -> Result<Subscription, AppError> {
        self.mutate_subscription(subscription_id, audit, "change_subscription_cycle", |sub| {
            sub.change_cycle(cycle)
        })
        .await
    }

    /// Soft-delete a subscription. Rows are never hard-deleted here.
    #[instrument(skip(self, audit), fields(subscription_id = %subscription_id))]
    pub async fn soft_delete_subscription(
        &self,
        subscription_id: Uuid,
        audit: &AuditContext,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["soft_delete_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET deleted_utc = now(), deleted_by = $2, updated_utc = now()
            WHERE subscription_id = $1 AND deleted_utc IS NULL
            "#,
        )
        .bind(subscription_id)
        .bind(audit.acting_user)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete subscription: {}", e))
        })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription not found"
            )));
        }

        info!(subscription_id = %subscription_id, "Subscription soft-deleted");
        Ok(())
    }

    /// Load a subscription under a row lock, apply an aggregate mutation, and
    /// persist the result. The aggregate enforces the status machine; this
    /// method only owns the transaction.
    async fn mutate_subscription<F>(
        &self,
        subscription_id: Uuid,
        audit: &AuditContext,
        operation: &'static str,
        mutate: F,
    ) -> Result<Subscription, AppError>
    where
        F: FnOnce(&mut Subscription) -> Result<(), AppError>,
    {
        let timer = DB_QUERY_DURATION.with_label_values(&[operation]).start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1 AND deleted_utc IS NULL
            FOR UPDATE
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load subscription: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        mutate(&mut subscription)?;

        let updated = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = $2, price_cents = $3, billing_cycle = $4, updated_by = $5, updated_utc = now()
            WHERE subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(&subscription.status)
        .bind(subscription.price_cents)
        .bind(&subscription.billing_cycle)
        .bind(audit.acting_user)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription_id, operation = operation, "Subscription updated");

        Ok(updated)
    }

    // =========================================================================
    // Billing Operations
    // =========================================================================

    /// Find subscriptions due for billing as of the given date.
    ///
    /// Uses `<=` so a run catches up on anything missed during scheduler
    /// downtime.
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub async fn find_due_for_billing(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_due_for_billing"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE status = 'active'
              AND deleted_utc IS NULL
              AND next_billing_date <= $1
            "#,
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to find subscriptions due for billing: {}",
                e
            ))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// Renew one subscription: advance the due date and append the ledger row
    /// in a single transaction.
    ///
    /// Eligibility is re-checked after the `FOR UPDATE` lock is acquired, so
    /// a concurrent run racing on the same row observes the advanced date and
    /// skips instead of double-charging.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, billing_date = %billing_date))]
    pub async fn apply_renewal(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<RenewalOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_renewal"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1
            FOR UPDATE
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock subscription: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if !subscription.is_due(billing_date) {
            timer.observe_duration();
            return Ok(RenewalOutcome::Skipped);
        }

        let next_billing_date = subscription.renew(billing_date)?;

        let updated = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET next_billing_date = $2, updated_utc = now()
            WHERE subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(next_billing_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance due date: {}", e))
        })?;

        let history_id = Uuid::new_v4();
        let history = sqlx::query_as::<_, BillingHistory>(
            r#"
            INSERT INTO billing_history (history_id, subscription_id, amount_paid_cents, paid_utc)
            VALUES ($1, $2, $3, $4)
            RETURNING history_id, subscription_id, amount_paid_cents, paid_utc
            "#,
        )
        .bind(history_id)
        .bind(subscription_id)
        .bind(subscription.price_cents)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert billing history: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit renewal: {}", e))
        })?;

        timer.observe_duration();
        info!(
            subscription_id = %subscription_id,
            history_id = %history.history_id,
            next_billing_date = %next_billing_date,
            "Subscription renewed"
        );

        Ok(RenewalOutcome::Renewed {
            subscription: updated,
            history,
        })
    }

    /// List the billing history of a subscription, newest first.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn list_billing_history(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<BillingHistory>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billing_history"])
            .start_timer();

        let history = sqlx::query_as::<_, BillingHistory>(
            r#"
            SELECT history_id, subscription_id, amount_paid_cents, paid_utc
            FROM billing_history
            WHERE subscription_id = $1
            ORDER BY paid_utc DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list billing history: {}", e))
        })?;

        timer.observe_duration();

        Ok(history)
    }

    // =========================================================================
    // Billing Run Operations
    // =========================================================================

    /// Create a billing run.
    #[instrument(skip(self))]
    pub async fn create_billing_run(
        &self,
        run_type: BillingRunType,
    ) -> Result<BillingRun, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_run"])
            .start_timer();

        let run_id = Uuid::new_v4();
        let run = sqlx::query_as::<_, BillingRun>(
            r#"
            INSERT INTO billing_runs (run_id, run_type)
            VALUES ($1, $2)
            RETURNING run_id, run_type, status, started_utc, completed_utc, subscriptions_processed, subscriptions_succeeded, subscriptions_skipped, subscriptions_failed
            "#,
        )
        .bind(run_id)
        .bind(run_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create billing run: {}", e))
        })?;

        timer.observe_duration();

        Ok(run)
    }

    /// Update billing run status and counts.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn complete_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        processed: i32,
        succeeded: i32,
        skipped: i32,
        failed: i32,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_billing_run"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE billing_runs
            SET status = $2, completed_utc = now(), subscriptions_processed = $3, subscriptions_succeeded = $4, subscriptions_skipped = $5, subscriptions_failed = $6
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(processed)
        .bind(succeeded)
        .bind(skipped)
        .bind(failed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to complete billing run: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    // =========================================================================
    // Webhook Config Operations
    // =========================================================================

    /// Look up a user's active webhook configuration. This service only reads
    /// configs; they are managed elsewhere.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn active_webhook_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WebhookConfig>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_webhook_config"])
            .start_timer();

        let config = sqlx::query_as::<_, WebhookConfig>(
            r#"
            SELECT config_id, user_id, url, secret, is_active, created_utc, updated_utc
            FROM webhook_configs
            WHERE user_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get webhook config: {}", e))
        })?;

        timer.observe_duration();

        Ok(config)
    }
}

#[async_trait]
impl BillingStore for Database {
    async fn find_due_for_billing(&self, as_of: NaiveDate) -> Result<Vec<Subscription>, AppError> {
        Database::find_due_for_billing(self, as_of).await
    }

    async fn apply_renewal(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<RenewalOutcome, AppError> {
        Database::apply_renewal(self, subscription_id, billing_date).await
    }

    async fn create_billing_run(&self, run_type: BillingRunType) -> Result<BillingRun, AppError> {
        Database::create_billing_run(self, run_type).await
    }

    async fn complete_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        processed: i32,
        succeeded: i32,
        skipped: i32,
        failed: i32,
    ) -> Result<(), AppError> {
        Database::complete_billing_run(self, run_id, status, processed, succeeded, skipped, failed)
            .await
    }
}

#[async_trait]
impl WebhookConfigStore for Database {
    async fn active_webhook_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WebhookConfig>, AppError> {
        Database::active_webhook_config(self, user_id).await
    }
}

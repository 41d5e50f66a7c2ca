//! Test helper module for billing-service integration tests.
//!
//! Provides in-memory implementations of the orchestrator's store and
//! publisher seams so billing behavior is testable without a database.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use billing_service::models::{
    BillingCycle, BillingHistory, BillingRun, BillingRunStatus, BillingRunType, Subscription,
    SubscriptionRenewed, SubscriptionStatus, WebhookConfig,
};
use billing_service::services::billing::{BillingStore, EventPublisher, RenewalOutcome};
use billing_service::services::webhook::WebhookConfigStore;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Build a subscription row for tests.
pub fn make_subscription(
    name: &str,
    price_cents: i64,
    cycle: BillingCycle,
    next_billing_date: NaiveDate,
    status: SubscriptionStatus,
) -> Subscription {
    Subscription {
        subscription_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: name.to_string(),
        price_cents,
        currency: "BRL".to_string(),
        billing_cycle: cycle.as_str().to_string(),
        next_billing_date,
        status: status.as_str().to_string(),
        category: None,
        created_by: None,
        updated_by: None,
        deleted_by: None,
        deleted_utc: None,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

/// In-memory `BillingStore`. Renewals mutate state under one lock, which
/// stands in for the row-level transaction of the Postgres implementation.
#[derive(Default)]
pub struct InMemoryBillingStore {
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    history: Mutex<Vec<BillingHistory>>,
    runs: Mutex<Vec<BillingRun>>,
    failing: Mutex<HashSet<Uuid>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) -> Uuid {
        let id = subscription.subscription_id;
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, subscription);
        id
    }

    /// Make `apply_renewal` fail for this subscription, simulating an
    /// infrastructure error on one batch item.
    pub fn fail_renewals_for(&self, subscription_id: Uuid) {
        self.failing.lock().unwrap().insert(subscription_id);
    }

    pub fn subscription(&self, subscription_id: Uuid) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(&subscription_id)
            .cloned()
    }

    pub fn history_for(&self, subscription_id: Uuid) -> Vec<BillingHistory> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    pub fn runs(&self) -> Vec<BillingRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_due_for_billing(&self, as_of: NaiveDate) -> Result<Vec<Subscription>, AppError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_due(as_of))
            .cloned()
            .collect())
    }

    async fn apply_renewal(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<RenewalOutcome, AppError> {
        if self.failing.lock().unwrap().contains(&subscription_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected renewal failure"
            )));
        }

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if !subscription.is_due(billing_date) {
            return Ok(RenewalOutcome::Skipped);
        }

        let next_billing_date = subscription.renew(billing_date)?;
        subscription.next_billing_date = next_billing_date;
        subscription.updated_utc = Utc::now();

        let history = BillingHistory {
            history_id: Uuid::new_v4(),
            subscription_id,
            amount_paid_cents: subscription.price_cents,
            paid_utc: Utc::now(),
        };
        self.history.lock().unwrap().push(history.clone());

        Ok(RenewalOutcome::Renewed {
            subscription: subscription.clone(),
            history,
        })
    }

    async fn create_billing_run(&self, run_type: BillingRunType) -> Result<BillingRun, AppError> {
        let run = BillingRun {
            run_id: Uuid::new_v4(),
            run_type: run_type.as_str().to_string(),
            status: BillingRunStatus::Running.as_str().to_string(),
            started_utc: Utc::now(),
            completed_utc: None,
            subscriptions_processed: 0,
            subscriptions_succeeded: 0,
            subscriptions_skipped: 0,
            subscriptions_failed: 0,
        };
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
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
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing run not found")))?;
        run.status = status.as_str().to_string();
        run.completed_utc = Some(Utc::now());
        run.subscriptions_processed = processed;
        run.subscriptions_succeeded = succeeded;
        run.subscriptions_skipped = skipped;
        run.subscriptions_failed = failed;
        Ok(())
    }
}

/// Publisher that records every published event.
#[derive(Default)]
pub struct CapturingPublisher {
    events: Mutex<Vec<SubscriptionRenewed>>,
}

impl CapturingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SubscriptionRenewed> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(&self, event: SubscriptionRenewed) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Config store holding at most one webhook config.
#[derive(Default)]
pub struct StaticConfigStore {
    config: Option<WebhookConfig>,
}

impl StaticConfigStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(config: WebhookConfig) -> Self {
        Self {
            config: Some(config),
        }
    }
}

#[async_trait]
impl WebhookConfigStore for StaticConfigStore {
    async fn active_webhook_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WebhookConfig>, AppError> {
        Ok(self
            .config
            .as_ref()
            .filter(|c| c.user_id == user_id && c.is_active)
            .cloned())
    }
}

/// Build a webhook config for tests.
pub fn make_webhook_config(user_id: Uuid, url: &str, secret: &str, is_active: bool) -> WebhookConfig {
    WebhookConfig {
        config_id: Uuid::new_v4(),
        user_id,
        url: url.to_string(),
        secret: secret.to_string(),
        is_active,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

//! Billing orchestrator.
//!
//! Ties due-billing selection, per-subscription renewal, ledger writes, and
//! event emission together. Each subscription is processed inside its own
//! failure boundary; one bad row never aborts the batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use service_core::error::AppError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::models::{
    BillingHistory, BillingRun, BillingRunStatus, BillingRunType, Subscription,
    SubscriptionRenewed,
};
use crate::services::metrics::{record_billing_run, record_error, record_renewal};

/// Result of one renewal attempt against the store.
#[derive(Debug)]
pub enum RenewalOutcome {
    /// The due date advanced and exactly one ledger row was written, both in
    /// the same transaction.
    Renewed {
        subscription: Subscription,
        history: BillingHistory,
    },
    /// The subscription was no longer eligible under the row lock (already
    /// billed by a concurrent run, paused, cancelled, or deleted meanwhile).
    Skipped,
}

/// Persistence operations the orchestrator depends on.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Every active subscription with `next_billing_date <= as_of`.
    async fn find_due_for_billing(&self, as_of: NaiveDate) -> Result<Vec<Subscription>, AppError>;

    /// Atomically advance the due date and append the ledger row, re-checking
    /// eligibility under a row lock. Must never produce two ledger rows for
    /// the same due cycle.
    async fn apply_renewal(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<RenewalOutcome, AppError>;

    async fn create_billing_run(&self, run_type: BillingRunType) -> Result<BillingRun, AppError>;

    async fn complete_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        processed: i32,
        succeeded: i32,
        skipped: i32,
        failed: i32,
    ) -> Result<(), AppError>;
}

/// Outbound side of the event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SubscriptionRenewed) -> Result<(), AppError>;
}

#[async_trait]
impl EventPublisher for mpsc::Sender<SubscriptionRenewed> {
    async fn publish(&self, event: SubscriptionRenewed) -> Result<(), AppError> {
        self.send(event)
            .await
            .map_err(|_| AppError::DeliveryFailed("event bus is closed".to_string()))
    }
}

/// Counters for one completed billing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingRunSummary {
    pub run_id: Uuid,
    pub processed: i32,
    pub succeeded: i32,
    pub skipped: i32,
    pub failed: i32,
}

enum ItemOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// The scheduled billing entry point.
pub struct BillingRunner {
    store: Arc<dyn BillingStore>,
    publisher: Arc<dyn EventPublisher>,
    concurrency: usize,
}

impl BillingRunner {
    pub fn new(
        store: Arc<dyn BillingStore>,
        publisher: Arc<dyn EventPublisher>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one billing batch for the given reference date.
    ///
    /// Per-subscription failures are logged and counted, never propagated;
    /// the batch itself only fails when the due set cannot be fetched or run
    /// bookkeeping cannot be written.
    #[instrument(skip(self), fields(run_type = run_type.as_str(), as_of = %as_of))]
    pub async fn run_once(
        &self,
        run_type: BillingRunType,
        as_of: NaiveDate,
    ) -> Result<BillingRunSummary, AppError> {
        let run = self.store.create_billing_run(run_type).await?;
        let due = self.store.find_due_for_billing(as_of).await?;

        info!(run_id = %run.run_id, due = due.len(), "Billing run started");

        let outcomes: Vec<ItemOutcome> = futures::stream::iter(due)
            .map(|subscription| {
                let store = self.store.clone();
                let publisher = self.publisher.clone();
                async move { process_subscription(store, publisher, subscription, as_of).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = BillingRunSummary {
            run_id: run.run_id,
            processed: outcomes.len() as i32,
            succeeded: 0,
            skipped: 0,
            failed: 0,
        };
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Succeeded => summary.succeeded += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::Failed => summary.failed += 1,
            }
        }

        self.store
            .complete_billing_run(
                run.run_id,
                BillingRunStatus::Completed,
                summary.processed,
                summary.succeeded,
                summary.skipped,
                summary.failed,
            )
            .await?;

        record_billing_run(run_type.as_str(), BillingRunStatus::Completed.as_str());
        info!(
            run_id = %run.run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Billing run completed"
        );

        Ok(summary)
    }
}

/// Renew one subscription inside its own failure boundary.
async fn process_subscription(
    store: Arc<dyn BillingStore>,
    publisher: Arc<dyn EventPublisher>,
    subscription: Subscription,
    as_of: NaiveDate,
) -> ItemOutcome {
    let subscription_id = subscription.subscription_id;

    match store.apply_renewal(subscription_id, as_of).await {
        Ok(RenewalOutcome::Renewed {
            subscription: renewed,
            history,
        }) => {
            record_renewal("renewed");
            let event = SubscriptionRenewed::new(
                renewed.subscription_id,
                renewed.user_id,
                history.history_id,
                renewed.name.clone(),
                history.amount_paid_cents,
                renewed.currency(),
                as_of,
                renewed.next_billing_date,
            );
            // The charge is committed at this point; a publish failure loses
            // at most the notification, which the at-least-once contract
            // allows. It must not mark the renewal failed.
            if let Err(e) = publisher.publish(event).await {
                record_error("publish_renewal_event");
                error!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Renewal committed but event publication failed"
                );
            }
            ItemOutcome::Succeeded
        }
        Ok(RenewalOutcome::Skipped) => {
            record_renewal("skipped");
            debug!(
                subscription_id = %subscription_id,
                "Subscription no longer eligible, skipping"
            );
            ItemOutcome::Skipped
        }
        Err(e) => {
            record_renewal("failed");
            record_error("apply_renewal");
            error!(
                subscription_id = %subscription_id,
                error = %e,
                "Failed to renew subscription"
            );
            ItemOutcome::Failed
        }
    }
}

//! Scheduled billing trigger.
//!
//! A single periodic tick invokes the billing runner; each invocation is a
//! short-lived batch, not a long-running job. The contractual cadence is
//! daily; development and testing shorten it via `BILLING_INTERVAL_SECS`
//! (e.g. 60 for minute-level runs).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::models::BillingRunType;
use crate::services::billing::BillingRunner;

/// Drive the billing runner on a fixed interval, forever.
///
/// A failed run is logged and absorbed; the next tick retries. When
/// `run_on_startup` is set, one manual batch runs before the schedule starts
/// (operational testing mode).
pub async fn run_billing_schedule(
    runner: Arc<BillingRunner>,
    interval: Duration,
    run_on_startup: bool,
) {
    if run_on_startup {
        trigger(&runner, BillingRunType::Manual).await;
    }

    info!(interval_secs = interval.as_secs(), "Billing schedule started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately; consume it so
    // the schedule waits one full period before its first run.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        trigger(&runner, BillingRunType::Scheduled).await;
    }
}

async fn trigger(runner: &BillingRunner, run_type: BillingRunType) {
    let today = Utc::now().date_naive();
    match runner.run_once(run_type, today).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                processed = summary.processed,
                succeeded = summary.succeeded,
                skipped = summary.skipped,
                failed = summary.failed,
                "Billing batch finished"
            );
        }
        Err(e) => {
            error!(error = %e, "Billing batch failed, will retry on next tick");
        }
    }
}

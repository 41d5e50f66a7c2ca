//! Billing history model.
//!
//! Append-only ledger of successful charges. The amount is captured at
//! charge time so historical rows survive later price changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingHistory {
    pub history_id: Uuid,
    pub subscription_id: Uuid,
    pub amount_paid_cents: i64,
    pub paid_utc: DateTime<Utc>,
}

//! Domain events.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use super::Currency;

/// Published after a renewal transaction commits. Immutable; carries the id
/// of the billing-history row the renewal produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRenewed {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub billing_history_id: Uuid,
    pub subscription_name: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub billing_date: NaiveDate,
    pub next_billing_date: NaiveDate,
    pub occurred_utc: DateTime<Utc>,
}

impl SubscriptionRenewed {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscription_id: Uuid,
        user_id: Uuid,
        billing_history_id: Uuid,
        subscription_name: String,
        amount_cents: i64,
        currency: Currency,
        billing_date: NaiveDate,
        next_billing_date: NaiveDate,
    ) -> Self {
        Self {
            subscription_id,
            user_id,
            billing_history_id,
            subscription_name,
            amount_cents,
            currency,
            billing_date,
            next_billing_date,
            occurred_utc: Utc::now(),
        }
    }

    /// Flatten to string key-value pairs for transport to the webhook
    /// dispatcher. Dates are ISO-8601.
    pub fn to_flat_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("subscription_id".to_string(), self.subscription_id.to_string()),
            ("user_id".to_string(), self.user_id.to_string()),
            (
                "billing_history_id".to_string(),
                self.billing_history_id.to_string(),
            ),
            (
                "subscription_name".to_string(),
                self.subscription_name.clone(),
            ),
            ("amount_cents".to_string(), self.amount_cents.to_string()),
            ("currency".to_string(), self.currency.as_str().to_string()),
            ("billing_date".to_string(), self.billing_date.to_string()),
            (
                "next_billing_date".to_string(),
                self.next_billing_date.to_string(),
            ),
            ("occurred_utc".to_string(), self.occurred_utc.to_rfc3339()),
        ])
    }

    /// Rebuild an event from its flat-map form.
    pub fn from_flat_map(map: &HashMap<String, String>) -> Result<Self, AppError> {
        Ok(Self {
            subscription_id: parse_field(map, "subscription_id", |s| Uuid::parse_str(s).ok())?,
            user_id: parse_field(map, "user_id", |s| Uuid::parse_str(s).ok())?,
            billing_history_id: parse_field(map, "billing_history_id", |s| {
                Uuid::parse_str(s).ok()
            })?,
            subscription_name: get_field(map, "subscription_name")?.to_string(),
            amount_cents: parse_field(map, "amount_cents", |s| s.parse().ok())?,
            currency: Currency::from_string(get_field(map, "currency")?),
            billing_date: parse_field(map, "billing_date", |s| s.parse().ok())?,
            next_billing_date: parse_field(map, "next_billing_date", |s| s.parse().ok())?,
            occurred_utc: parse_field(map, "occurred_utc", |s| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })?,
        })
    }
}

fn get_field<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing event field: {}", key)))
}

fn parse_field<T>(
    map: &HashMap<String, String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, AppError> {
    let raw = get_field(map, key)?;
    parse(raw)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid event field {}: {}", key, raw)))
}

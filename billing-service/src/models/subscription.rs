//! Subscription model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::{BillingCycle, Currency};

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paused" => SubscriptionStatus::Paused,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Active,
        }
    }
}

/// Acting-user context stamped onto write operations.
///
/// The caller supplies this explicitly; the core never reads ambient
/// authentication state.
#[derive(Debug, Clone, Copy)]
pub struct AuditContext {
    pub acting_user: Uuid,
}

impl AuditContext {
    pub fn new(acting_user: Uuid) -> Self {
        Self { acting_user }
    }
}

/// Subscription aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle: String,
    pub next_billing_date: NaiveDate,
    pub status: String,
    pub category: Option<String>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub deleted_by: Option<Uuid>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn cycle(&self) -> BillingCycle {
        BillingCycle::from_string(&self.billing_cycle)
    }

    pub fn currency(&self) -> Currency {
        Currency::from_string(&self.currency)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    /// Whether the subscription must be billed as of the given date.
    ///
    /// Uses `<=`, not `==`, so billing self-heals after missed runs.
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        !self.is_deleted()
            && self.status() == SubscriptionStatus::Active
            && self.next_billing_date <= as_of
    }

    fn ensure_not_deleted(&self) -> Result<(), AppError> {
        if self.is_deleted() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Subscription {} is deleted",
                self.subscription_id
            )));
        }
        Ok(())
    }

    /// Compute the next due date for a charge made on `billing_date`.
    ///
    /// Pure: persists nothing and emits nothing, so cycle arithmetic is
    /// testable without infrastructure. Only active subscriptions renew.
    pub fn renew(&self, billing_date: NaiveDate) -> Result<NaiveDate, AppError> {
        self.ensure_not_deleted()?;
        if self.status() != SubscriptionStatus::Active {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Subscription {} is {} and cannot be renewed",
                self.subscription_id,
                self.status
            )));
        }
        Ok(self.cycle().next_date(billing_date))
    }

    /// ACTIVE -> PAUSED.
    pub fn pause(&mut self) -> Result<(), AppError> {
        self.transition(SubscriptionStatus::Active, SubscriptionStatus::Paused)
    }

    /// PAUSED -> ACTIVE.
    pub fn reactivate(&mut self) -> Result<(), AppError> {
        self.transition(SubscriptionStatus::Paused, SubscriptionStatus::Active)
    }

    /// ACTIVE or PAUSED -> CANCELLED. Terminal: no transitions out.
    pub fn cancel(&mut self) -> Result<(), AppError> {
        self.ensure_not_deleted()?;
        if self.status() == SubscriptionStatus::Cancelled {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Subscription {} is already cancelled",
                self.subscription_id
            )));
        }
        self.status = SubscriptionStatus::Cancelled.as_str().to_string();
        Ok(())
    }

    pub fn change_price(&mut self, price_cents: i64) -> Result<(), AppError> {
        self.ensure_not_deleted()?;
        if price_cents < 0 {
            return Err(validation_error("price_cents", "price must not be negative").into());
        }
        self.price_cents = price_cents;
        Ok(())
    }

    pub fn change_cycle(&mut self, cycle: BillingCycle) -> Result<(), AppError> {
        self.ensure_not_deleted()?;
        self.billing_cycle = cycle.as_str().to_string();
        Ok(())
    }

    fn transition(
        &mut self,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<(), AppError> {
        self.ensure_not_deleted()?;
        if self.status() != from {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Subscription {} is {} and cannot move to {}",
                self.subscription_id,
                self.status,
                to.as_str()
            )));
        }
        self.status = to.as_str().to_string();
        Ok(())
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone, Validate)]
pub struct CreateSubscription {
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    pub currency: Currency,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: NaiveDate,
    pub category: Option<String>,
}

impl CreateSubscription {
    /// Validate the input against the caller-supplied reference date.
    pub fn validate_as_of(&self, today: NaiveDate) -> Result<(), AppError> {
        self.validate()?;
        if self.next_billing_date < today {
            return Err(
                validation_error("next_billing_date", "must be today or in the future").into(),
            );
        }
        Ok(())
    }
}

fn validation_error(field: &'static str, message: &'static str) -> validator::ValidationErrors {
    let mut err = validator::ValidationError::new(field);
    err.message = Some(message.into());
    let mut errors = validator::ValidationErrors::new();
    errors.add(field, err);
    errors
}

//! Webhook configuration and dispatch models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::SubscriptionRenewed;

/// A user's webhook endpoint. Owned by the configuration layer; this service
/// only reads it when dispatching notifications.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookConfig {
    pub config_id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub secret: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// A queued delivery of one renewal notification.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub billing_history_id: Uuid,
    pub payload: HashMap<String, String>,
}

impl DispatchJob {
    pub fn from_event(event: &SubscriptionRenewed) -> Self {
        Self {
            subscription_id: event.subscription_id,
            user_id: event.user_id,
            billing_history_id: event.billing_history_id,
            payload: event.to_flat_map(),
        }
    }
}

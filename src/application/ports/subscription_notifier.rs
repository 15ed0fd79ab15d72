use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    app_error::AppResult,
    domain::entities::subscription::{BillingPeriod, SubscriptionProfile, SubscriptionStatus},
};

/// Body pushed to collaborators after a subscription changed state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionChange {
    pub event: String,
    pub subscription_id: String,
    pub user_external_id: String,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub expires_at: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

impl SubscriptionChange {
    pub const EVENT_NAME: &'static str = "subscription.changed";

    pub fn from_profile(subscription: &SubscriptionProfile) -> Self {
        Self {
            event: Self::EVENT_NAME.to_string(),
            subscription_id: subscription.external_id.clone(),
            user_external_id: subscription.user_external_id.clone(),
            status: subscription.status,
            period: subscription.period,
            expires_at: subscription.expires_at,
            changed_at: subscription.last_event_at,
        }
    }
}

/// Outbound transport for change notifications.
#[async_trait]
pub trait SubscriptionNotifier: Send + Sync {
    /// Makes a single delivery attempt and returns the HTTP status received.
    /// Implementations map an elapsed attempt timeout to `AppError::Timeout`.
    async fn send(&self, body: &str) -> AppResult<u16>;
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    app_error::{AppError, AppResult},
    application::{use_cases::webhook_ingestion::LedgerRepoTrait, validators::is_valid_external_id},
    domain::entities::{
        payment::PaymentProfile,
        subscription::{SubscriptionProfile, SubscriptionStatus},
        user::UserProfile,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusView {
    pub user: UserProfile,
    /// The active subscription if there is one, otherwise the most recent.
    pub subscription: Option<SubscriptionProfile>,
    pub entitled: bool,
    pub payments: Vec<PaymentProfile>,
}

#[derive(Clone)]
pub struct SubscriptionQueryUseCases {
    ledger: Arc<dyn LedgerRepoTrait>,
}

impl SubscriptionQueryUseCases {
    pub fn new(ledger: Arc<dyn LedgerRepoTrait>) -> Self {
        Self { ledger }
    }

    pub async fn status_for_user(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionStatusView> {
        if !is_valid_external_id(external_id) {
            return Err(AppError::ValidationError("invalid user id".into()));
        }

        let user = self
            .ledger
            .get_user_by_external_id(external_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let subscriptions = self.ledger.list_subscriptions_for_user(user.id).await?;
        let subscription = subscriptions
            .iter()
            .find(|s| s.status == SubscriptionStatus::Active)
            .or_else(|| subscriptions.first())
            .cloned();
        let entitled = subscription.as_ref().is_some_and(|s| s.is_entitled(now));
        let payments = self.ledger.list_payments_for_user(user.id).await?;

        Ok(SubscriptionStatusView {
            user,
            subscription,
            entitled,
            payments,
        })
    }
}

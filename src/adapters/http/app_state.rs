use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    infra::{config::AppConfig, notification_worker::NotificationQueue},
    use_cases::{
        subscription_query::SubscriptionQueryUseCases,
        webhook_ingestion::WebhookIngestionUseCases,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ingestion_use_cases: Arc<WebhookIngestionUseCases>,
    pub subscription_query_use_cases: Arc<SubscriptionQueryUseCases>,
    /// Present only when an outbound notification target is configured.
    pub notifications: Option<NotificationQueue>,
}

impl FromRef<AppState> for Arc<WebhookIngestionUseCases> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ingestion_use_cases.clone()
    }
}

impl FromRef<AppState> for Arc<SubscriptionQueryUseCases> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.subscription_query_use_cases.clone()
    }
}

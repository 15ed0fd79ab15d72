use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::subscription_notifier::SubscriptionNotifier,
};

/// Posts change notifications as JSON to a single collaborator URL.
pub struct HttpSubscriptionNotifier {
    client: Client,
    url: Url,
}

impl HttpSubscriptionNotifier {
    /// `client` must carry the per-attempt timeout.
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl SubscriptionNotifier for HttpSubscriptionNotifier {
    async fn send(&self, body: &str) -> AppResult<u16> {
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout
                } else {
                    AppError::Internal(format!("notification request failed: {}", e))
                }
            })?;

        Ok(response.status().as_u16())
    }
}

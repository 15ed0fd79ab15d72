use std::{sync::Arc, time::Duration};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::subscription_notifier::{SubscriptionChange, SubscriptionNotifier},
        use_cases::webhook_ingestion::WebhookEventRepoTrait,
    },
    domain::entities::webhook_event::{
        EventDirection, EventOutcome, NewWebhookEvent, WebhookEventProfile,
    },
};

pub const TIMEOUT_ERROR: &str = "timeout";
/// Error stored on outbound records whose delivery never finished.
pub const INTERRUPTED_ERROR: &str = "interrupted";

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Exponential delay before retry number `attempt` (1-based), capped, with
/// up to 25% random jitter added.
pub fn calculate_backoff_delay(config: &NotifierConfig, attempt: u32) -> Duration {
    let exponential = config
        .base_backoff
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exponential.min(config.max_backoff);
    let jitter_ceiling = (capped.as_millis() as u64 / 4).max(1);
    capped + Duration::from_millis(rand::random::<u64>() % jitter_ceiling)
}

/// Pushes subscription changes to a collaborator and records every push as
/// an outbound Event Store entry.
#[derive(Clone)]
pub struct ChangeNotificationUseCases {
    event_repo: Arc<dyn WebhookEventRepoTrait>,
    notifier: Arc<dyn SubscriptionNotifier>,
    config: NotifierConfig,
}

impl ChangeNotificationUseCases {
    pub fn new(
        event_repo: Arc<dyn WebhookEventRepoTrait>,
        notifier: Arc<dyn SubscriptionNotifier>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            event_repo,
            notifier,
            config,
        }
    }

    /// Delivers one change within the attempt budget. The outbound record
    /// always ends `processed` (delivered) or `errored` (gave up).
    pub async fn notify(&self, change: &SubscriptionChange) -> AppResult<WebhookEventProfile> {
        let body = serde_json::to_string(change)
            .map_err(|e| AppError::Internal(format!("failed to serialize notification: {}", e)))?;
        let payload = serde_json::to_value(change)
            .map_err(|e| AppError::Internal(format!("failed to serialize notification: {}", e)))?;

        let record = self
            .event_repo
            .record(&NewWebhookEvent {
                direction: EventDirection::Outbound,
                event_name: change.event.clone(),
                idempotency_key: None,
                payload: Some(payload),
                payload_raw: body.clone(),
                sent_at: Some(chrono::Utc::now()),
            })
            .await?;

        let outcome = self.deliver(record.id, &body).await;
        self.event_repo.mark_processed(record.id, &outcome).await
    }

    /// Closes outbound records left `received` for longer than `older_than`,
    /// e.g. by a shutdown during delivery.
    pub async fn release_interrupted(&self, older_than: Duration) -> AppResult<u64> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| AppError::Internal(format!("invalid stale threshold: {}", e)))?;
        let outcome = EventOutcome::errored(500, INTERRUPTED_ERROR);
        self.event_repo
            .fail_stale_outbound(chrono::Utc::now() - older_than, &outcome)
            .await
    }

    async fn deliver(&self, record_id: i64, body: &str) -> EventOutcome {
        let attempts = self.config.max_attempts.max(1);
        let mut last = EventOutcome::errored(AppError::Timeout.status_code(), TIMEOUT_ERROR);

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(calculate_backoff_delay(&self.config, attempt - 1)).await;
            }

            match self.notifier.send(body).await {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::debug!(event_id = record_id, attempt, status, "Notification delivered");
                    return EventOutcome::Processed {
                        status_code: status,
                        note: (attempt > 1).then_some("delivered after retry".to_string()),
                    };
                }
                Ok(status) => {
                    tracing::warn!(event_id = record_id, attempt, status, "Notification rejected");
                    last = EventOutcome::errored(status, format!("http {}", status));
                }
                Err(AppError::Timeout) => {
                    tracing::warn!(event_id = record_id, attempt, "Notification timed out");
                    last = EventOutcome::errored(AppError::Timeout.status_code(), TIMEOUT_ERROR);
                }
                Err(e) => {
                    tracing::warn!(event_id = record_id, attempt, error = %e, "Notification failed");
                    last = EventOutcome::errored(e.status_code(), e.to_string());
                }
            }
        }

        tracing::error!(
            event_id = record_id,
            attempts,
            error = last.error().unwrap_or_default(),
            "Giving up on notification"
        );
        last
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::subscription_notifier::SubscriptionChange,
        reconciler::{SkipReason, reconcile},
        webhook_payload::{
            ParsedWebhook, parse_webhook, peek_event_name, peek_idempotency_key, peek_sent_at,
        },
    },
    domain::entities::{
        payment::{NewPayment, PaymentProfile},
        subscription::{SubscriptionProfile, SubscriptionUpsert},
        user::{UserDetails, UserProfile},
        webhook_event::{
            EventDirection, EventOutcome, NewWebhookEvent, WebhookEventProfile,
        },
    },
};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_EVENT_LIST_LIMIT: i64 = 50;
pub const MAX_EVENT_LIST_LIMIT: i64 = 500;
pub const DUPLICATE_NOTE: &str = "duplicate";
/// Event name stored when the body is not JSON or carries no name.
pub const UNNAMED_EVENT: &str = "unknown";

// ============================================================================
// Repository Traits
// ============================================================================

/// Append-only log of every webhook delivery, inbound and outbound.
#[async_trait]
pub trait WebhookEventRepoTrait: Send + Sync {
    async fn record(&self, event: &NewWebhookEvent) -> AppResult<WebhookEventProfile>;

    /// Writes the terminal outcome. Fails with `AlreadyFinalized` if the
    /// record has already left `received`, and `NotFound` for unknown ids.
    async fn mark_processed(
        &self,
        id: i64,
        outcome: &EventOutcome,
    ) -> AppResult<WebhookEventProfile>;

    async fn get_by_id(&self, id: i64) -> AppResult<Option<WebhookEventProfile>>;

    async fn list_recent(&self, limit: i64) -> AppResult<Vec<WebhookEventProfile>>;

    /// Writes `outcome` to outbound records still `received` that were
    /// recorded before `before`. Returns how many were closed.
    async fn fail_stale_outbound(
        &self,
        before: DateTime<Utc>,
        outcome: &EventOutcome,
    ) -> AppResult<u64>;
}

#[async_trait]
pub trait LedgerRepoTrait: Send + Sync {
    /// Opens a transactional unit. Dropping it without `commit` rolls back.
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;

    async fn get_user_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>>;

    async fn list_subscriptions_for_user(&self, user_id: Uuid)
    -> AppResult<Vec<SubscriptionProfile>>;

    async fn list_payments_for_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentProfile>>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Returns `false` if the key was already claimed by a committed event.
    async fn claim_event_key(&mut self, key: &str, event_name: &str) -> AppResult<bool>;

    /// Serializes work on one external subscription id until the unit ends
    /// and returns its current row.
    async fn lock_subscription(
        &mut self,
        external_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>>;

    async fn find_or_create_user(
        &mut self,
        external_id: &str,
        details: &UserDetails,
    ) -> AppResult<UserProfile>;

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
        user: &UserProfile,
    ) -> AppResult<SubscriptionWrite>;

    async fn record_payment(
        &mut self,
        user: &UserProfile,
        payment: &NewPayment,
    ) -> AppResult<PaymentProfile>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct SubscriptionWrite {
    pub subscription: SubscriptionProfile,
    /// False when the stored row was newer and the write was ignored.
    pub applied: bool,
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub default_currency: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            default_currency: "RUB".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub event_id: i64,
    pub duplicate: bool,
    pub note: Option<&'static str>,
    /// Set when a subscription changed state and collaborators should hear
    /// about it.
    pub change: Option<SubscriptionChange>,
}

#[derive(Debug, Default)]
struct Applied {
    duplicate: bool,
    note: Option<&'static str>,
    change: Option<SubscriptionChange>,
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct WebhookIngestionUseCases {
    event_repo: Arc<dyn WebhookEventRepoTrait>,
    ledger: Arc<dyn LedgerRepoTrait>,
    config: IngestionConfig,
}

impl WebhookIngestionUseCases {
    pub fn new(
        event_repo: Arc<dyn WebhookEventRepoTrait>,
        ledger: Arc<dyn LedgerRepoTrait>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            event_repo,
            ledger,
            config,
        }
    }

    /// Records, validates and applies one provider delivery.
    ///
    /// The receipt is persisted before anything else; every path after that
    /// writes exactly one terminal outcome to it. An `Err` carries the status
    /// the provider should see.
    pub async fn ingest(&self, raw: &str, received_at: DateTime<Utc>) -> AppResult<IngestOutcome> {
        let payload = serde_json::from_str::<JsonValue>(raw).ok();
        let record = self
            .event_repo
            .record(&NewWebhookEvent {
                direction: EventDirection::Inbound,
                event_name: payload
                    .as_ref()
                    .and_then(peek_event_name)
                    .unwrap_or_else(|| UNNAMED_EVENT.to_string()),
                idempotency_key: Some(peek_idempotency_key(payload.as_ref(), raw)),
                payload: payload.clone(),
                payload_raw: raw.to_string(),
                sent_at: payload.as_ref().and_then(peek_sent_at),
            })
            .await?;

        let parsed = match payload {
            Some(payload) => parse_webhook(&payload, raw, received_at),
            None => Err(AppError::ValidationError("body is not valid JSON".into())),
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(event_id = record.id, error = %e, "Rejected webhook payload");
                self.finish(record.id, EventOutcome::errored(e.status_code(), e.to_string()))
                    .await;
                return Err(e);
            }
        };

        match self.apply(&parsed).await {
            Ok(applied) => {
                let outcome = match applied.note {
                    Some(note) => EventOutcome::processed_with_note(note),
                    None => EventOutcome::processed(),
                };
                tracing::info!(
                    event_id = record.id,
                    event_name = %parsed.name,
                    idempotency_key = %parsed.idempotency_key,
                    duplicate = applied.duplicate,
                    note = applied.note,
                    "Webhook processed"
                );
                self.finish(record.id, outcome).await;
                Ok(IngestOutcome {
                    event_id: record.id,
                    duplicate: applied.duplicate,
                    note: applied.note,
                    change: applied.change,
                })
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        event_id = record.id,
                        idempotency_key = %parsed.idempotency_key,
                        error = %e,
                        "Failed to apply webhook"
                    );
                } else {
                    tracing::warn!(
                        event_id = record.id,
                        idempotency_key = %parsed.idempotency_key,
                        error = %e,
                        "Webhook rejected by reconciler"
                    );
                }
                self.finish(record.id, EventOutcome::errored(e.status_code(), e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Runs the ledger transaction for one parsed event. Any error drops the
    /// unit, which rolls back everything including the key claim.
    async fn apply(&self, parsed: &ParsedWebhook) -> AppResult<Applied> {
        let mut tx = self.ledger.begin().await?;

        if !tx
            .claim_event_key(&parsed.idempotency_key, &parsed.name)
            .await?
        {
            return Ok(Applied {
                duplicate: true,
                note: Some(DUPLICATE_NOTE),
                change: None,
            });
        }

        let current = match parsed.event.subscription_external_id() {
            Some(external_id) => tx.lock_subscription(external_id).await?,
            None => None,
        };

        let plan = reconcile(parsed, current.as_ref())?;
        let mut applied = Applied {
            note: plan.skip.map(|s| s.note()),
            ..Default::default()
        };

        if let Some(customer) = &plan.user {
            let user = tx
                .find_or_create_user(&customer.external_id, &customer.details)
                .await?;

            if let Some(upsert) = &plan.subscription {
                let write = tx.upsert_subscription(upsert, &user).await?;
                if write.applied {
                    applied.change = Some(SubscriptionChange::from_profile(&write.subscription));
                } else {
                    applied.note = Some(SkipReason::Stale.note());
                }
            }

            if let Some(amount) = &plan.payment {
                let payment = NewPayment {
                    event_name: parsed.name.clone(),
                    amount_cents: amount.cents,
                    currency: amount
                        .currency
                        .clone()
                        .unwrap_or_else(|| self.config.default_currency.clone()),
                    idempotency_key: parsed.idempotency_key.clone(),
                };
                tx.record_payment(&user, &payment).await?;
            }
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// Writes the terminal outcome. Failures here are logged only: the
    /// ledger is already committed and redelivery is deduplicated.
    async fn finish(&self, id: i64, outcome: EventOutcome) {
        match self.event_repo.mark_processed(id, &outcome).await {
            Ok(_) => {}
            Err(AppError::AlreadyFinalized) => {
                tracing::debug!(event_id = id, "Webhook event already finalized");
            }
            Err(e) => {
                tracing::error!(event_id = id, error = %e, "Failed to record webhook outcome");
            }
        }
    }

    // ========================================================================
    // Event Store Queries
    // ========================================================================

    pub async fn list_events(&self, limit: Option<i64>) -> AppResult<Vec<WebhookEventProfile>> {
        let limit = limit
            .unwrap_or(DEFAULT_EVENT_LIST_LIMIT)
            .clamp(1, MAX_EVENT_LIST_LIMIT);
        self.event_repo.list_recent(limit).await
    }

    pub async fn get_event(&self, id: i64) -> AppResult<WebhookEventProfile> {
        self.event_repo.get_by_id(id).await?.ok_or(AppError::NotFound)
    }
}

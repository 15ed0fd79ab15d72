use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::subscription::SubscriptionStatus;

/// Event kinds the reconciler knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionRenewed,
    SubscriptionCancelled,
    SubscriptionExpired,
    /// Any `payment.*` event.
    Payment,
}

impl EventKind {
    pub const PAYMENT_PREFIX: &'static str = "payment.";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "subscription.created",
            Self::SubscriptionRenewed => "subscription.renewed",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::SubscriptionExpired => "subscription.expired",
            Self::Payment => "payment.*",
        }
    }

    /// Maps a provider event name to a known kind. Legacy provider names are
    /// accepted as aliases. Returns `None` for kinds we do not recognize.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "subscription.created" | "new_subscription" => Some(Self::SubscriptionCreated),
            "subscription.renewed" => Some(Self::SubscriptionRenewed),
            "subscription.cancelled" | "subscription.canceled" | "cancelled_subscription" => {
                Some(Self::SubscriptionCancelled)
            }
            "subscription.expired" => Some(Self::SubscriptionExpired),
            "new_digital_product" => Some(Self::Payment),
            n if n.starts_with(Self::PAYMENT_PREFIX) && n.len() > Self::PAYMENT_PREFIX.len() => {
                Some(Self::Payment)
            }
            _ => None,
        }
    }

    /// The subscription status this kind drives the subscription into, if any.
    pub fn target_status(&self) -> Option<SubscriptionStatus> {
        match self {
            Self::SubscriptionCreated | Self::SubscriptionRenewed => {
                Some(SubscriptionStatus::Active)
            }
            Self::SubscriptionCancelled => Some(SubscriptionStatus::Cancelled),
            Self::SubscriptionExpired => Some(SubscriptionStatus::Expired),
            Self::Payment => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound records are provider notifications; outbound records are change
/// notifications we push to collaborators. They share one table but their
/// terminal states mean different things.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processed,
    Errored,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Received => "received",
            EventStatus::Processed => "processed",
            EventStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Received)
    }
}

/// Terminal outcome written exactly once per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Processed {
        status_code: u16,
        note: Option<String>,
    },
    Errored {
        status_code: u16,
        error: String,
    },
}

impl EventOutcome {
    pub fn processed() -> Self {
        EventOutcome::Processed {
            status_code: 200,
            note: None,
        }
    }

    pub fn processed_with_note(note: impl Into<String>) -> Self {
        EventOutcome::Processed {
            status_code: 200,
            note: Some(note.into()),
        }
    }

    pub fn errored(status_code: u16, error: impl Into<String>) -> Self {
        EventOutcome::Errored {
            status_code,
            error: error.into(),
        }
    }

    pub fn status(&self) -> EventStatus {
        match self {
            EventOutcome::Processed { .. } => EventStatus::Processed,
            EventOutcome::Errored { .. } => EventStatus::Errored,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            EventOutcome::Processed { status_code, .. }
            | EventOutcome::Errored { status_code, .. } => *status_code,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            EventOutcome::Processed { note, .. } => note.as_deref(),
            EventOutcome::Errored { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            EventOutcome::Processed { .. } => None,
            EventOutcome::Errored { error, .. } => Some(error.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub direction: EventDirection,
    pub event_name: String,
    pub idempotency_key: Option<String>,
    pub payload: Option<JsonValue>,
    pub payload_raw: String,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventProfile {
    pub id: i64,
    pub direction: EventDirection,
    pub event_name: String,
    pub idempotency_key: Option<String>,
    pub payload: Option<JsonValue>,
    pub payload_raw: String,
    pub received_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub note: Option<String>,
}

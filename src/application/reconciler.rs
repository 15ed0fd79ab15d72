//! Maps a parsed webhook onto the ledger mutations it implies.
//!
//! Everything here is pure: the caller supplies the currently stored
//! subscription (read under the per-subscription lock) and applies the
//! resulting plan inside its own transaction.

use chrono::{DateTime, Utc};

use crate::{
    app_error::{AppError, AppResult},
    application::webhook_payload::{Amount, Customer, Event, Expiry, ParsedWebhook, SubscriptionEvent},
    domain::entities::{
        subscription::{SubscriptionProfile, SubscriptionUpsert},
        webhook_event::EventKind,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Event kind we do not apply; acknowledged and recorded only.
    Unrecognized,
    /// Older than the last event already applied to the subscription.
    Stale,
}

impl SkipReason {
    pub fn note(&self) -> &'static str {
        match self {
            SkipReason::Unrecognized => "unrecognized event kind",
            SkipReason::Stale => "stale event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationPlan {
    pub user: Option<Customer>,
    pub subscription: Option<SubscriptionUpsert>,
    pub payment: Option<Amount>,
    pub skip: Option<SkipReason>,
}

impl MutationPlan {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skip: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.subscription.is_none() && self.payment.is_none()
    }
}

pub fn reconcile(
    webhook: &ParsedWebhook,
    current: Option<&SubscriptionProfile>,
) -> AppResult<MutationPlan> {
    match &webhook.event {
        Event::Unknown { .. } => Ok(MutationPlan::skipped(SkipReason::Unrecognized)),
        Event::Payment(payment) => Ok(MutationPlan {
            user: Some(payment.customer.clone()),
            payment: Some(payment.amount.clone()),
            ..Default::default()
        }),
        Event::Subscription(event) => reconcile_subscription(event, webhook.event_time, current),
    }
}

fn reconcile_subscription(
    event: &SubscriptionEvent,
    event_time: DateTime<Utc>,
    current: Option<&SubscriptionProfile>,
) -> AppResult<MutationPlan> {
    let target = event.kind.target_status().ok_or_else(|| {
        AppError::Internal(format!("{} is not a subscription event", event.kind))
    })?;

    if let Some(status) = event.status {
        if status != target {
            return Err(AppError::InvalidEvent(format!(
                "status {} contradicts {}",
                status, event.kind
            )));
        }
    }

    if let Some(current) = current {
        if current.user_external_id != event.customer.external_id {
            return Err(AppError::InvalidEvent(format!(
                "subscription {} belongs to another customer",
                event.subscription_id
            )));
        }
        if event_time < current.last_event_at {
            return Ok(MutationPlan::skipped(SkipReason::Stale));
        }
    }

    let period = event
        .period
        .or(current.map(|c| c.period))
        .ok_or_else(|| {
            AppError::InvalidEvent(format!(
                "{} for unknown subscription {} without a period",
                event.kind, event.subscription_id
            ))
        })?;

    let expires_at = match (event.kind, event.expires_at) {
        (_, Expiry::At(at)) => Some(at),
        (_, Expiry::Null) => None,
        (EventKind::SubscriptionCancelled | EventKind::SubscriptionExpired, Expiry::Absent) => {
            current.and_then(|c| c.expires_at)
        }
        (_, Expiry::Absent) => None,
    };

    match (period.is_lifetime(), expires_at) {
        (true, Some(_)) => {
            return Err(AppError::InvalidEvent(
                "lifetime subscription cannot carry an expiry".into(),
            ));
        }
        (false, None) => {
            return Err(AppError::InvalidEvent(format!(
                "{} subscription requires an expiry",
                period
            )));
        }
        _ => {}
    }

    Ok(MutationPlan {
        user: Some(event.customer.clone()),
        subscription: Some(SubscriptionUpsert {
            external_id: event.subscription_id.clone(),
            status: target,
            period,
            expires_at,
            event_time,
        }),
        payment: event.amount.clone(),
        skip: None,
    })
}

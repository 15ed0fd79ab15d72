use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub event_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

/// Converts a provider amount in major units (e.g. `299.5`) to minor units.
pub fn amount_to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents > i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

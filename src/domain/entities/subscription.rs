use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Returns true once the subscription can no longer become active again
    /// without a fresh renewal event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Billing period of a subscription. `Lifetime` is the only period allowed
/// to carry no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "billing_period", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
    Lifetime,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Weekly => "weekly",
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Quarterly => "quarterly",
            BillingPeriod::HalfYearly => "half_yearly",
            BillingPeriod::Yearly => "yearly",
            BillingPeriod::Lifetime => "lifetime",
        }
    }

    pub fn is_lifetime(&self) -> bool {
        matches!(self, BillingPeriod::Lifetime)
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" | "week" => Ok(BillingPeriod::Weekly),
            "monthly" | "month" => Ok(BillingPeriod::Monthly),
            "quarterly" | "quarter" => Ok(BillingPeriod::Quarterly),
            "half_yearly" | "half-yearly" | "semiannual" => Ok(BillingPeriod::HalfYearly),
            "yearly" | "year" | "annual" | "annually" => Ok(BillingPeriod::Yearly),
            "lifetime" | "forever" | "permanent" => Ok(BillingPeriod::Lifetime),
            _ => Err(format!("Invalid billing period: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionProfile {
    pub id: Uuid,
    pub external_id: String,
    pub user_id: Uuid,
    /// External id of the owning user, joined in for ownership checks.
    pub user_external_id: String,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionProfile {
    /// Whether the owner should currently have access.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Desired post-event state of a subscription. Applied only when
/// `event_time` is not older than the stored `last_event_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpsert {
    pub external_id: String,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub expires_at: Option<DateTime<Utc>>,
    pub event_time: DateTime<Utc>,
}

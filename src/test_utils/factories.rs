//! Test data factories.
//!
//! Each factory returns a complete, valid object; use the closure to override
//! specific fields.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::entities::{
    subscription::{BillingPeriod, SubscriptionProfile, SubscriptionStatus},
    user::UserProfile,
};

/// Create a test user with sensible defaults.
pub fn create_test_user(overrides: impl FnOnce(&mut UserProfile)) -> UserProfile {
    let mut user = UserProfile {
        id: Uuid::new_v4(),
        external_id: "42".to_string(),
        username: Some("neo".to_string()),
        first_name: Some("Thomas".to_string()),
        last_name: Some("Anderson".to_string()),
        email: None,
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut user);
    user
}

/// Create an active monthly subscription owned by `user`.
pub fn create_test_subscription(
    user: &UserProfile,
    overrides: impl FnOnce(&mut SubscriptionProfile),
) -> SubscriptionProfile {
    let mut subscription = SubscriptionProfile {
        id: Uuid::new_v4(),
        external_id: "sub_1".to_string(),
        user_id: user.id,
        user_external_id: user.external_id.clone(),
        status: SubscriptionStatus::Active,
        period: BillingPeriod::Monthly,
        expires_at: Some(Utc::now() + Duration::days(30)),
        last_event_at: test_datetime(),
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut subscription);
    subscription
}

/// Fixed timestamp for deterministic fixtures.
pub fn test_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

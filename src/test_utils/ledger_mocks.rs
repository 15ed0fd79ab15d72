//! In-memory ledger for testing.
//!
//! A transaction holds the whole ledger lock, works on a staged copy and
//! writes it back only on commit, so dropping it rolls everything back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::webhook_ingestion::{LedgerRepoTrait, LedgerTx, SubscriptionWrite},
    domain::entities::{
        payment::{NewPayment, PaymentProfile},
        subscription::{SubscriptionProfile, SubscriptionStatus, SubscriptionUpsert},
        user::{UserDetails, UserProfile},
    },
};

#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    /// Keyed by external id.
    pub users: HashMap<String, UserProfile>,
    /// Keyed by external id.
    pub subscriptions: HashMap<String, SubscriptionProfile>,
    pub payments: Vec<PaymentProfile>,
    pub applied_keys: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.state
            .lock()
            .await
            .users
            .insert(user.external_id.clone(), user);
    }

    pub async fn insert_subscription(&self, subscription: SubscriptionProfile) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.external_id.clone(), subscription);
    }

    pub async fn user(&self, external_id: &str) -> Option<UserProfile> {
        self.state.lock().await.users.get(external_id).cloned()
    }

    pub async fn subscription(&self, external_id: &str) -> Option<SubscriptionProfile> {
        self.state
            .lock()
            .await
            .subscriptions
            .get(external_id)
            .cloned()
    }

    pub async fn payments_for(&self, user_id: Uuid) -> Vec<PaymentProfile> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerRepoTrait for InMemoryLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryLedgerTx { guard, staged }))
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self.user(external_id).await)
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<SubscriptionProfile>> {
        let state = self.state.lock().await;
        let mut subscriptions: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(subscriptions)
    }

    async fn list_payments_for_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentProfile>> {
        let mut payments = self.payments_for(user_id).await;
        payments.reverse();
        Ok(payments)
    }
}

pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn claim_event_key(&mut self, key: &str, _event_name: &str) -> AppResult<bool> {
        Ok(self.staged.applied_keys.insert(key.to_string()))
    }

    async fn lock_subscription(
        &mut self,
        external_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        Ok(self.staged.subscriptions.get(external_id).cloned())
    }

    async fn find_or_create_user(
        &mut self,
        external_id: &str,
        details: &UserDetails,
    ) -> AppResult<UserProfile> {
        let now = Utc::now();
        let user = self
            .staged
            .users
            .entry(external_id.to_string())
            .or_insert_with(|| UserProfile {
                id: Uuid::new_v4(),
                external_id: external_id.to_string(),
                username: None,
                first_name: None,
                last_name: None,
                email: None,
                created_at: now,
                updated_at: now,
            });

        let mut changed = false;
        for (slot, value) in [
            (&mut user.username, &details.username),
            (&mut user.first_name, &details.first_name),
            (&mut user.last_name, &details.last_name),
            (&mut user.email, &details.email),
        ] {
            if value.is_some() && *slot != *value {
                *slot = value.clone();
                changed = true;
            }
        }
        if changed {
            user.updated_at = now;
        }
        Ok(user.clone())
    }

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
        user: &UserProfile,
    ) -> AppResult<SubscriptionWrite> {
        let existing = self.staged.subscriptions.get(&upsert.external_id).cloned();
        if let Some(existing) = &existing {
            if upsert.event_time < existing.last_event_at {
                return Ok(SubscriptionWrite {
                    subscription: existing.clone(),
                    applied: false,
                });
            }
        }

        let now = Utc::now();
        let mut status = upsert.status;
        if status == SubscriptionStatus::Active {
            let newer_sibling = self.staged.subscriptions.values().any(|other| {
                other.user_id == user.id
                    && other.external_id != upsert.external_id
                    && other.status == SubscriptionStatus::Active
                    && (other.last_event_at, other.external_id.as_str())
                        > (upsert.event_time, upsert.external_id.as_str())
            });
            if newer_sibling {
                status = SubscriptionStatus::Expired;
            } else {
                for other in self.staged.subscriptions.values_mut() {
                    if other.user_id == user.id
                        && other.external_id != upsert.external_id
                        && other.status == SubscriptionStatus::Active
                    {
                        other.status = SubscriptionStatus::Expired;
                        other.updated_at = now;
                    }
                }
            }
        }

        let subscription = SubscriptionProfile {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |s| s.id),
            external_id: upsert.external_id.clone(),
            user_id: user.id,
            user_external_id: user.external_id.clone(),
            status,
            period: upsert.period,
            expires_at: upsert.expires_at,
            last_event_at: upsert.event_time,
            created_at: existing.as_ref().map_or(now, |s| s.created_at),
            updated_at: now,
        };
        self.staged
            .subscriptions
            .insert(subscription.external_id.clone(), subscription.clone());

        Ok(SubscriptionWrite {
            subscription,
            applied: true,
        })
    }

    async fn record_payment(
        &mut self,
        user: &UserProfile,
        payment: &NewPayment,
    ) -> AppResult<PaymentProfile> {
        if self
            .staged
            .payments
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(AppError::Database(
                "duplicate key value violates unique constraint".into(),
            ));
        }

        let profile = PaymentProfile {
            id: Uuid::new_v4(),
            user_id: user.id,
            event_name: payment.event_name.clone(),
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            idempotency_key: payment.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        self.staged.payments.push(profile.clone());
        Ok(profile)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let InMemoryLedgerTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

/// Ledger operation a `FailingLedger` breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestLedgerFailure {
    Begin,
    UpsertSubscription,
    RecordPayment,
    Commit,
}

/// Wraps an in-memory ledger and injects a storage error at one step.
pub struct FailingLedger {
    inner: Arc<InMemoryLedger>,
    failure: TestLedgerFailure,
}

impl FailingLedger {
    pub fn new(inner: Arc<InMemoryLedger>, failure: TestLedgerFailure) -> Self {
        Self { inner, failure }
    }
}

fn injected() -> AppError {
    AppError::Database("injected failure".into())
}

#[async_trait]
impl LedgerRepoTrait for FailingLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        if self.failure == TestLedgerFailure::Begin {
            return Err(injected());
        }
        let inner = self.inner.begin().await?;
        Ok(Box::new(FailingLedgerTx {
            inner,
            failure: self.failure,
        }))
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>> {
        self.inner.get_user_by_external_id(external_id).await
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<SubscriptionProfile>> {
        self.inner.list_subscriptions_for_user(user_id).await
    }

    async fn list_payments_for_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentProfile>> {
        self.inner.list_payments_for_user(user_id).await
    }
}

struct FailingLedgerTx {
    inner: Box<dyn LedgerTx>,
    failure: TestLedgerFailure,
}

#[async_trait]
impl LedgerTx for FailingLedgerTx {
    async fn claim_event_key(&mut self, key: &str, event_name: &str) -> AppResult<bool> {
        self.inner.claim_event_key(key, event_name).await
    }

    async fn lock_subscription(
        &mut self,
        external_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        self.inner.lock_subscription(external_id).await
    }

    async fn find_or_create_user(
        &mut self,
        external_id: &str,
        details: &UserDetails,
    ) -> AppResult<UserProfile> {
        self.inner.find_or_create_user(external_id, details).await
    }

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
        user: &UserProfile,
    ) -> AppResult<SubscriptionWrite> {
        if self.failure == TestLedgerFailure::UpsertSubscription {
            return Err(injected());
        }
        self.inner.upsert_subscription(upsert, user).await
    }

    async fn record_payment(
        &mut self,
        user: &UserProfile,
        payment: &NewPayment,
    ) -> AppResult<PaymentProfile> {
        if self.failure == TestLedgerFailure::RecordPayment {
            return Err(injected());
        }
        self.inner.record_payment(user, payment).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        if self.failure == TestLedgerFailure::Commit {
            return Err(injected());
        }
        self.inner.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn upsert(external_id: &str, hours: i64) -> SubscriptionUpsert {
        SubscriptionUpsert {
            external_id: external_id.to_string(),
            status: SubscriptionStatus::Active,
            period: crate::domain::entities::subscription::BillingPeriod::Lifetime,
            expires_at: None,
            event_time: crate::test_utils::test_datetime() + Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let ledger = InMemoryLedger::new();
        {
            let mut tx = ledger.begin().await.unwrap();
            assert!(tx.claim_event_key("evt_1", "x").await.unwrap());
            let user = tx
                .find_or_create_user("42", &UserDetails::default())
                .await
                .unwrap();
            tx.upsert_subscription(&upsert("sub_1", 0), &user)
                .await
                .unwrap();
        }

        assert!(ledger.user("42").await.is_none());
        let mut tx = ledger.begin().await.unwrap();
        assert!(tx.claim_event_key("evt_1", "x").await.unwrap());
    }

    #[tokio::test]
    async fn user_details_are_never_cleared() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        tx.find_or_create_user(
            "42",
            &UserDetails {
                username: Some("neo".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let user = tx
            .find_or_create_user(
                "42",
                &UserDetails {
                    first_name: Some("Thomas".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(user.username.as_deref(), Some("neo"));
        assert_eq!(user.first_name.as_deref(), Some("Thomas"));
    }

    #[tokio::test]
    async fn older_upsert_is_not_applied() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        let user = tx
            .find_or_create_user("42", &UserDetails::default())
            .await
            .unwrap();
        tx.upsert_subscription(&upsert("sub_1", 5), &user)
            .await
            .unwrap();
        let write = tx
            .upsert_subscription(&upsert("sub_1", 1), &user)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(!write.applied);
        assert_eq!(
            write.subscription.last_event_at,
            crate::test_utils::test_datetime() + Duration::hours(5)
        );
    }
}

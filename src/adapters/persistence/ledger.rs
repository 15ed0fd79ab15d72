use async_trait::async_trait;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::webhook_ingestion::{LedgerRepoTrait, LedgerTx, SubscriptionWrite},
    domain::entities::{
        payment::{NewPayment, PaymentProfile},
        subscription::{SubscriptionProfile, SubscriptionStatus, SubscriptionUpsert},
        user::{UserDetails, UserProfile},
    },
};

// ============================================================================
// Row Mapping
// ============================================================================

const USER_COLS: &str =
    "id, external_id, username, first_name, last_name, email, created_at, updated_at";

const SUBSCRIPTION_COLS: &str = "s.id, s.external_id, s.user_id, u.external_id AS user_external_id, \
     s.status, s.period, s.expires_at, s.last_event_at, s.created_at, s.updated_at";

const PAYMENT_COLS: &str =
    "id, user_id, event_name, amount_cents, currency, idempotency_key, created_at";

fn row_to_user(row: &sqlx::postgres::PgRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        external_id: row.get("external_id"),
        username: row.get("username"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> SubscriptionProfile {
    SubscriptionProfile {
        id: row.get("id"),
        external_id: row.get("external_id"),
        user_id: row.get("user_id"),
        user_external_id: row.get("user_external_id"),
        status: row.get("status"),
        period: row.get("period"),
        expires_at: row.get("expires_at"),
        last_event_at: row.get("last_event_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_payment(row: &sqlx::postgres::PgRow) -> PaymentProfile {
    PaymentProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        event_name: row.get("event_name"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// Non-transactional Reads
// ============================================================================

#[async_trait]
impl LedgerRepoTrait for PostgresPersistence {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.pool().begin().await.map_err(AppError::from)?;
        Ok(Box::new(PostgresLedgerTx { tx }))
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE external_id = $1",
            USER_COLS
        ))
        .bind(external_id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(row.as_ref().map(row_to_user))
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<SubscriptionProfile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.user_id = $1
            ORDER BY s.updated_at DESC
            "#,
            SUBSCRIPTION_COLS
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn list_payments_for_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
            PAYMENT_COLS
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(rows.iter().map(row_to_payment).collect())
    }
}

// ============================================================================
// Transactional Unit
// ============================================================================

/// One ledger transaction. sqlx rolls the transaction back when it is
/// dropped without `commit`.
pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresLedgerTx {
    async fn fetch_subscription(
        &mut self,
        external_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.external_id = $1
            "#,
            SUBSCRIPTION_COLS
        ))
        .bind(external_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(row.as_ref().map(row_to_subscription))
    }
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn claim_event_key(&mut self, key: &str, event_name: &str) -> AppResult<bool> {
        // A concurrent claimant of the same key blocks here until the first
        // transaction ends, then sees the conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO applied_events (idempotency_key, event_name)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING idempotency_key
            "#,
        )
        .bind(key)
        .bind(event_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(row.is_some())
    }

    async fn lock_subscription(
        &mut self,
        external_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(external_id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::from)?;

        self.fetch_subscription(external_id).await
    }

    async fn find_or_create_user(
        &mut self,
        external_id: &str,
        details: &UserDetails,
    ) -> AppResult<UserProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, external_id, username, first_name, last_name, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE SET
                username = COALESCE(EXCLUDED.username, users.username),
                first_name = COALESCE(EXCLUDED.first_name, users.first_name),
                last_name = COALESCE(EXCLUDED.last_name, users.last_name),
                email = COALESCE(EXCLUDED.email, users.email),
                updated_at = NOW()
            RETURNING {}
            "#,
            USER_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(&details.username)
        .bind(&details.first_name)
        .bind(&details.last_name)
        .bind(&details.email)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(row_to_user(&row))
    }

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
        user: &UserProfile,
    ) -> AppResult<SubscriptionWrite> {
        if let Some(existing) = self.fetch_subscription(&upsert.external_id).await? {
            if upsert.event_time < existing.last_event_at {
                return Ok(SubscriptionWrite {
                    subscription: existing,
                    applied: false,
                });
            }
        }

        let mut status = upsert.status;
        if status == SubscriptionStatus::Active {
            // The user row stays locked from `find_or_create_user` until commit,
            // so activations for one user do not interleave.
            // Ties on event_time are broken by external id.
            let newer_sibling: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM subscriptions
                    WHERE user_id = $1 AND status = 'active' AND external_id <> $2
                      AND (last_event_at, external_id) > ($3::timestamptz, $2::text)
                )
                "#,
            )
            .bind(user.id)
            .bind(&upsert.external_id)
            .bind(upsert.event_time)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::from)?;

            if newer_sibling {
                tracing::info!(
                    user_id = %user.id,
                    subscription_id = %upsert.external_id,
                    "Activation predates the user's current subscription, storing as expired"
                );
                status = SubscriptionStatus::Expired;
            } else {
                let superseded = sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'expired', updated_at = NOW()
                    WHERE user_id = $1 AND status = 'active' AND external_id <> $2
                    "#,
                )
                .bind(user.id)
                .bind(&upsert.external_id)
                .execute(&mut *self.tx)
                .await
                .map_err(AppError::from)?;

                if superseded.rows_affected() > 0 {
                    tracing::info!(
                        user_id = %user.id,
                        subscription_id = %upsert.external_id,
                        superseded = superseded.rows_affected(),
                        "Expired superseded subscriptions"
                    );
                }
            }
        }

        let written = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, external_id, user_id, status, period, expires_at, last_event_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (external_id) DO UPDATE SET
                status = EXCLUDED.status,
                period = EXCLUDED.period,
                expires_at = EXCLUDED.expires_at,
                last_event_at = EXCLUDED.last_event_at,
                updated_at = NOW()
            WHERE subscriptions.last_event_at <= EXCLUDED.last_event_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upsert.external_id)
        .bind(user.id)
        .bind(status)
        .bind(upsert.period)
        .bind(upsert.expires_at)
        .bind(upsert.event_time)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        let subscription = self
            .fetch_subscription(&upsert.external_id)
            .await?
            .ok_or(AppError::NotFound)?;

        Ok(SubscriptionWrite {
            subscription,
            applied: written.is_some(),
        })
    }

    async fn record_payment(
        &mut self,
        user: &UserProfile,
        payment: &NewPayment,
    ) -> AppResult<PaymentProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (id, user_id, event_name, amount_cents, currency, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PAYMENT_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&payment.event_name)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(&payment.idempotency_key)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(row_to_payment(&row))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(AppError::from)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::webhook_ingestion::WebhookEventRepoTrait,
    domain::entities::webhook_event::{
        EventOutcome, EventStatus, NewWebhookEvent, WebhookEventProfile,
    },
};

fn row_to_profile(row: sqlx::postgres::PgRow) -> WebhookEventProfile {
    WebhookEventProfile {
        id: row.get("id"),
        direction: row.get("direction"),
        event_name: row.get("event_name"),
        idempotency_key: row.get("idempotency_key"),
        payload: row.get("payload"),
        payload_raw: row.get("payload_raw"),
        received_at: row.get("received_at"),
        sent_at: row.get("sent_at"),
        processed_at: row.get("processed_at"),
        status: row.get("status"),
        status_code: row.get("status_code"),
        error: row.get("error"),
        note: row.get("note"),
    }
}

const SELECT_COLS: &str = "id, direction, event_name, idempotency_key, payload, payload_raw, \
     received_at, sent_at, processed_at, status, status_code, error, note";

#[async_trait]
impl WebhookEventRepoTrait for PostgresPersistence {
    async fn record(&self, event: &NewWebhookEvent) -> AppResult<WebhookEventProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO webhook_events
                (direction, event_name, idempotency_key, payload, payload_raw, sent_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(event.direction)
        .bind(&event.event_name)
        .bind(&event.idempotency_key)
        .bind(&event.payload)
        .bind(&event.payload_raw)
        .bind(event.sent_at)
        .bind(EventStatus::Received)
        .fetch_one(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(row_to_profile(row))
    }

    async fn mark_processed(
        &self,
        id: i64,
        outcome: &EventOutcome,
    ) -> AppResult<WebhookEventProfile> {
        // The status guard makes the first terminal write win.
        let row = sqlx::query(&format!(
            r#"
            UPDATE webhook_events
            SET status = $2, status_code = $3, note = $4, error = $5, processed_at = NOW()
            WHERE id = $1 AND status = 'received'
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(outcome.status())
        .bind(i32::from(outcome.status_code()))
        .bind(outcome.note())
        .bind(outcome.error())
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;

        match row {
            Some(row) => Ok(row_to_profile(row)),
            None => match self.get_by_id(id).await? {
                Some(_) => Err(AppError::AlreadyFinalized),
                None => Err(AppError::NotFound),
            },
        }
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<WebhookEventProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_events WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(row.map(row_to_profile))
    }

    async fn list_recent(&self, limit: i64) -> AppResult<Vec<WebhookEventProfile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM webhook_events
            ORDER BY id DESC
            LIMIT $1
            "#,
            SELECT_COLS
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(rows.into_iter().map(row_to_profile).collect())
    }

    async fn fail_stale_outbound(
        &self,
        before: DateTime<Utc>,
        outcome: &EventOutcome,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, status_code = $3, note = $4, error = $5, processed_at = NOW()
            WHERE direction = 'outbound' AND status = 'received' AND received_at < $1
            "#,
        )
        .bind(before)
        .bind(outcome.status())
        .bind(i32::from(outcome.status_code()))
        .bind(outcome.note())
        .bind(outcome.error())
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected())
    }
}

//! In-memory Event Store and notifier doubles.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::subscription_notifier::SubscriptionNotifier,
        use_cases::webhook_ingestion::WebhookEventRepoTrait,
    },
    domain::entities::webhook_event::{
        EventDirection, EventOutcome, EventStatus, NewWebhookEvent, WebhookEventProfile,
    },
};

/// In-memory implementation of WebhookEventRepoTrait for testing.
#[derive(Default)]
pub struct InMemoryWebhookEventRepo {
    pub events: Mutex<Vec<WebhookEventProfile>>,
    fail_record: bool,
}

impl InMemoryWebhookEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repo whose `record` always fails, as if storage were down.
    pub fn failing() -> Self {
        Self {
            fail_record: true,
            ..Self::default()
        }
    }

    /// Get a record by id (for test assertions).
    pub fn get(&self, id: i64) -> Option<WebhookEventProfile> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All records in insertion order (for test assertions).
    pub fn all(&self) -> Vec<WebhookEventProfile> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookEventRepoTrait for InMemoryWebhookEventRepo {
    async fn record(&self, event: &NewWebhookEvent) -> AppResult<WebhookEventProfile> {
        if self.fail_record {
            return Err(AppError::Database("connection refused".into()));
        }

        let mut events = self.events.lock().unwrap();
        let profile = WebhookEventProfile {
            id: events.len() as i64 + 1,
            direction: event.direction,
            event_name: event.event_name.clone(),
            idempotency_key: event.idempotency_key.clone(),
            payload: event.payload.clone(),
            payload_raw: event.payload_raw.clone(),
            received_at: chrono::Utc::now(),
            sent_at: event.sent_at,
            processed_at: None,
            status: EventStatus::Received,
            status_code: None,
            error: None,
            note: None,
        };
        events.push(profile.clone());
        Ok(profile)
    }

    async fn mark_processed(
        &self,
        id: i64,
        outcome: &EventOutcome,
    ) -> AppResult<WebhookEventProfile> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(AppError::NotFound)?;

        if event.status.is_terminal() {
            return Err(AppError::AlreadyFinalized);
        }

        event.status = outcome.status();
        event.status_code = Some(i32::from(outcome.status_code()));
        event.note = outcome.note().map(str::to_string);
        event.error = outcome.error().map(str::to_string);
        event.processed_at = Some(chrono::Utc::now());
        Ok(event.clone())
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<WebhookEventProfile>> {
        Ok(self.get(id))
    }

    async fn list_recent(&self, limit: i64) -> AppResult<Vec<WebhookEventProfile>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn fail_stale_outbound(
        &self,
        before: DateTime<Utc>,
        outcome: &EventOutcome,
    ) -> AppResult<u64> {
        let mut events = self.events.lock().unwrap();
        let mut closed = 0;
        for event in events.iter_mut().filter(|e| {
            e.direction == EventDirection::Outbound
                && e.status == EventStatus::Received
                && e.received_at < before
        }) {
            event.status = outcome.status();
            event.status_code = Some(i32::from(outcome.status_code()));
            event.error = outcome.error().map(str::to_string);
            event.processed_at = Some(Utc::now());
            closed += 1;
        }
        Ok(closed)
    }
}

/// Notifier that replays a fixed script of responses, then answers 200.
#[derive(Default)]
pub struct ScriptedNotifier {
    responses: Mutex<VecDeque<AppResult<u16>>>,
    bodies: Mutex<Vec<String>>,
}

impl ScriptedNotifier {
    pub fn new(responses: Vec<AppResult<u16>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            bodies: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionNotifier for ScriptedNotifier {
    async fn send(&self, body: &str) -> AppResult<u16> {
        self.bodies.lock().unwrap().push(body.to_string());
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::webhook_event::EventDirection;

    fn new_event() -> NewWebhookEvent {
        NewWebhookEvent {
            direction: EventDirection::Inbound,
            event_name: "subscription.created".to_string(),
            idempotency_key: Some("evt_1".to_string()),
            payload: None,
            payload_raw: "{}".to_string(),
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn second_terminal_write_is_rejected() {
        let repo = InMemoryWebhookEventRepo::new();
        let record = repo.record(&new_event()).await.unwrap();

        repo.mark_processed(record.id, &EventOutcome::processed())
            .await
            .unwrap();
        let err = repo
            .mark_processed(record.id, &EventOutcome::errored(500, "late"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyFinalized));
        let stored = repo.get(record.id).unwrap();
        assert_eq!(stored.status, EventStatus::Processed);
        assert_eq!(stored.error, None);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let repo = InMemoryWebhookEventRepo::new();
        let err = repo
            .mark_processed(99, &EventOutcome::processed())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}

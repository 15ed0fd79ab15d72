use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::application::{
    ports::subscription_notifier::SubscriptionChange,
    use_cases::change_notification::ChangeNotificationUseCases,
};

const STALE_CHECK_INTERVAL_SECS: u64 = 60;
/// Longer than any delivery can take within its attempt budget.
const STALE_OUTBOUND_AFTER_SECS: u64 = 600;

/// Handle for queueing change notifications. Changes are delivered one at a
/// time in the order they were queued.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::UnboundedSender<SubscriptionChange>,
}

impl NotificationQueue {
    pub fn enqueue(&self, change: SubscriptionChange) {
        if let Err(e) = self.sender.send(change) {
            warn!(
                subscription_id = %e.0.subscription_id,
                "Notification worker is gone, dropping subscription change"
            );
        }
    }
}

/// Starts the delivery loop on the current runtime and returns its queue.
pub fn spawn_notification_worker(use_cases: Arc<ChangeNotificationUseCases>) -> NotificationQueue {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(run_notification_loop(use_cases, receiver));
    NotificationQueue { sender }
}

pub async fn run_notification_loop(
    use_cases: Arc<ChangeNotificationUseCases>,
    mut receiver: mpsc::UnboundedReceiver<SubscriptionChange>,
) {
    let mut stale_ticker = interval(Duration::from_secs(STALE_CHECK_INTERVAL_SECS));
    let mut delivered = DeliveredChanges::default();

    info!(
        "Notification worker started (stale check every {}s)",
        STALE_CHECK_INTERVAL_SECS
    );

    loop {
        tokio::select! {
            change = receiver.recv() => {
                let Some(change) = change else {
                    info!("Notification queue closed, worker stopping");
                    break;
                };
                deliver_in_order(&use_cases, &mut delivered, change).await;
            }
            _ = stale_ticker.tick() => {
                release_stale(&use_cases).await;
            }
        }
    }
}

/// Newest `changed_at` pushed per subscription.
#[derive(Debug, Default)]
struct DeliveredChanges {
    latest: HashMap<String, DateTime<Utc>>,
}

impl DeliveredChanges {
    /// Claims the change for delivery unless a newer one for the same
    /// subscription already went out.
    fn claim(&mut self, change: &SubscriptionChange) -> bool {
        match self.latest.get(&change.subscription_id) {
            Some(latest) if *latest > change.changed_at => false,
            _ => {
                self.latest
                    .insert(change.subscription_id.clone(), change.changed_at);
                true
            }
        }
    }
}

async fn deliver_in_order(
    use_cases: &ChangeNotificationUseCases,
    delivered: &mut DeliveredChanges,
    change: SubscriptionChange,
) {
    if !delivered.claim(&change) {
        debug!(
            subscription_id = %change.subscription_id,
            changed_at = %change.changed_at,
            "Skipping change older than one already delivered"
        );
        return;
    }

    if let Err(e) = use_cases.notify(&change).await {
        error!(
            subscription_id = %change.subscription_id,
            error = %e,
            "Failed to record subscription change notification"
        );
    }
}

async fn release_stale(use_cases: &ChangeNotificationUseCases) {
    match use_cases
        .release_interrupted(Duration::from_secs(STALE_OUTBOUND_AFTER_SECS))
        .await
    {
        Ok(0) => {}
        Ok(count) => warn!(count, "Closed interrupted outbound notifications"),
        Err(e) => error!(error = %e, "Failed to close interrupted outbound notifications"),
    }
}

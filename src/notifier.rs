use crate::models::Notification;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Human-readable text for a status, with a generic fallback for statuses
/// that have no mapped message (expired, cancelled).
pub fn status_message(status: &str) -> &'static str {
    match status {
        "pending" => "Credit application pending",
        "preapproved" => "Application preapproved",
        "manual_required" => "Manual review required",
        "country_validated" => "Country validations passed",
        "country_invalidated" => "Country validations failed",
        "in_review" => "Application in review",
        "approved" => "Application approved",
        "rejected" => "Application rejected",
        _ => "Status updated",
    }
}

/// Builds the status-change notification for an application.
pub fn status_notification(application_id: i64, status: &str) -> Notification {
    Notification {
        type_: "status".to_string(),
        credit_application_id: application_id,
        status: status.to_string(),
        message: status_message(status).to_string(),
    }
}

/// Publisher capability injected into the components that broadcast status
/// changes. Delivery is fire-and-forget: implementations log and swallow
/// transport errors so a lost notification can never fail or roll back the
/// status write that triggered it.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: i64, notification: Notification);
}

/// In-process notifier backed by one tokio broadcast channel per user.
/// Transport layers (websocket, SSE) subscribe to the owning user's stream.
pub struct BroadcastNotifier {
    channels: RwLock<HashMap<i64, broadcast::Sender<Notification>>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: 64,
        }
    }

    /// Subscribes to the stream for one user, creating it if needed.
    pub fn subscribe(&self, user_id: i64) -> broadcast::Receiver<Notification> {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, user_id: i64, notification: Notification) {
        let channels = match self.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match channels.get(&user_id) {
            Some(sender) => {
                if let Err(e) = sender.send(notification) {
                    // No live receivers; the notification is simply dropped.
                    tracing::warn!("Dropped notification for user {}: {}", user_id, e);
                }
            }
            None => {
                tracing::debug!("No notification stream open for user {}", user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_table_has_fallback() {
        assert_eq!(status_message("country_validated"), "Country validations passed");
        assert_eq!(status_message("country_invalidated"), "Country validations failed");
        assert_eq!(status_message("expired"), "Status updated");
        assert_eq!(status_message("made_up_status"), "Status updated");
    }

    #[tokio::test]
    async fn subscriber_receives_published_notification() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe(42);

        notifier.notify(42, status_notification(7, "country_invalidated"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.type_, "status");
        assert_eq!(received.credit_application_id, 7);
        assert_eq!(received.status, "country_invalidated");
        assert_eq!(received.message, "Country validations failed");
    }

    #[test]
    fn notify_without_subscribers_is_swallowed() {
        let notifier = BroadcastNotifier::new();
        // No stream for this user; must not panic or error.
        notifier.notify(99, status_notification(1, "approved"));
    }

    #[tokio::test]
    async fn streams_are_isolated_per_user() {
        let notifier = BroadcastNotifier::new();
        let mut rx_a = notifier.subscribe(1);
        let mut rx_b = notifier.subscribe(2);

        notifier.notify(1, status_notification(10, "approved"));

        assert_eq!(rx_a.recv().await.unwrap().credit_application_id, 10);
        assert!(rx_b.try_recv().is_err());
    }
}

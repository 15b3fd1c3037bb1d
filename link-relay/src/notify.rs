//! Push notifications.
//!
//! Delivery is fire-and-forget: [`Notifier::enqueue`] spawns the dispatch on
//! its own task and only logs failures. The transport sits behind
//! [`NotificationDispatcher`]; the relay ships a log-only dispatcher and a
//! webhook dispatcher that POSTs the notification as JSON.

use crate::config::NotificationConfig;
use async_trait::async_trait;
use link_types::UserId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One push notification addressed to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Recipient.
    pub user_id: UserId,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("webhook returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// A push notification transport.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver one notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Dispatcher that only logs what it would send.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            user = %notification.user_id,
            title = %notification.title,
            body = %notification.body,
            "No push transport configured, would send notification"
        );
        Ok(())
    }
}

/// Dispatcher that POSTs each notification as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    /// Build a dispatcher for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(user = %notification.user_id, "Notification delivered to webhook");
        Ok(())
    }
}

/// Build the dispatcher named by the configuration.
pub fn dispatcher_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn NotificationDispatcher>, NotifyError> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Push notifications via webhook");
            Ok(Arc::new(WebhookDispatcher::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => {
            tracing::info!("Push notifications are log-only");
            Ok(Arc::new(LogDispatcher))
        }
    }
}

/// Builds notifications and hands them to the dispatcher in the background.
#[derive(Clone)]
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    title: String,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Create a notifier that titles every notification with `title`.
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, title: impl Into<String>) -> Self {
        Self {
            dispatcher,
            title: title.into(),
        }
    }

    /// Notification telling `recipient` that `sender` sent a love event.
    pub fn love_event(&self, recipient: UserId, sender: &str, duration_seconds: u32) -> Notification {
        Notification {
            user_id: recipient,
            title: self.title.clone(),
            body: format!(
                "{sender} sent you a heart! <3\n{}",
                format_duration(duration_seconds)
            ),
        }
    }

    /// Notification telling `recipient` that `requester` wants to pair.
    pub fn pair_request(&self, recipient: UserId, requester: &str) -> Notification {
        Notification {
            user_id: recipient,
            title: self.title.clone(),
            body: format!("{requester} wants to connect with you!"),
        }
    }

    /// Dispatch `notification` on a background task.
    pub fn enqueue(&self, notification: Notification) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send(&notification).await {
                tracing::warn!(user = %notification.user_id, error = %e, "Push notification failed");
            }
        })
    }
}

/// Render seconds as `"2 min 5 sec"`, `"3 min"` or `"42 sec"`.
pub fn format_duration(seconds: u32) -> String {
    let minutes = seconds / 60;
    let secs = seconds % 60;

    match (minutes, secs) {
        (0, s) => format!("{s} sec"),
        (m, 0) => format!("{m} min"),
        (m, s) => format!("{m} min {s} sec"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Dispatcher that records every notification it is asked to send.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    /// Dispatcher that always fails.
    pub struct FailingDispatcher;

    #[async_trait]
    impl NotificationDispatcher for FailingDispatcher {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Status { status: 503 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingDispatcher, RecordingDispatcher};
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(42), "42 sec");
        assert_eq!(format_duration(180), "3 min");
        assert_eq!(format_duration(125), "2 min 5 sec");
    }

    #[test]
    fn love_event_body_names_sender_and_duration() {
        let notifier = Notifier::new(Arc::new(LogDispatcher), "Love Connection");
        let recipient = UserId::new();

        let n = notifier.love_event(recipient, "alice", 65);

        assert_eq!(n.user_id, recipient);
        assert_eq!(n.title, "Love Connection");
        assert_eq!(n.body, "alice sent you a heart! <3\n1 min 5 sec");
    }

    #[test]
    fn pair_request_body() {
        let notifier = Notifier::new(Arc::new(LogDispatcher), "t");
        let n = notifier.pair_request(UserId::new(), "bob");
        assert_eq!(n.body, "bob wants to connect with you!");
    }

    #[tokio::test]
    async fn enqueue_reaches_dispatcher() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let notifier = Notifier::new(recorder.clone(), "t");
        let n = notifier.pair_request(UserId::new(), "bob");

        notifier.enqueue(n.clone()).await.unwrap();

        assert_eq!(*recorder.sent.lock().await, vec![n]);
    }

    #[tokio::test]
    async fn enqueue_swallows_failures() {
        let notifier = Notifier::new(Arc::new(FailingDispatcher), "t");
        let n = notifier.pair_request(UserId::new(), "bob");
        notifier.enqueue(n).await.unwrap();
    }

    #[test]
    fn config_without_url_builds_log_dispatcher() {
        let config = NotificationConfig::default();
        assert!(dispatcher_from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn webhook_reports_unreachable_endpoint() {
        let dispatcher =
            WebhookDispatcher::new("http://127.0.0.1:9/push", Duration::from_secs(1)).unwrap();
        let n = Notification {
            user_id: UserId::new(),
            title: "t".into(),
            body: "b".into(),
        };
        assert!(matches!(
            dispatcher.send(&n).await,
            Err(NotifyError::Http(_))
        ));
    }
}

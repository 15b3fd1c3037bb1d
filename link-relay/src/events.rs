//! Love event routing.
//!
//! A love event is bound to the sender's active pair at the moment it is
//! sent; the recipient is always the other member of that pair. After the
//! event is stored it is pushed to the partner's live connection (if any)
//! and a push notification is queued. Neither delivery can fail the send.

use crate::error::{ServiceError, ServiceResult};
use crate::notify::Notifier;
use crate::pairing::PairingService;
use crate::registry::ConnectionRegistry;
use crate::server::RelayMetrics;
use crate::storage::PairStore;
use link_types::{LiveFrame, LoveEvent, LoveStats, UserId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Maximum number of events returned by [`EventRouter::history`].
pub const HISTORY_LIMIT: u32 = 100;

/// Persists love events and fans them out to the partner.
#[derive(Clone)]
pub struct EventRouter {
    pairing: PairingService,
    store: Arc<dyn PairStore>,
    registry: ConnectionRegistry,
    notifier: Notifier,
    metrics: Arc<RelayMetrics>,
    max_duration_secs: u32,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("max_duration_secs", &self.max_duration_secs)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Create a router.
    pub fn new(
        pairing: PairingService,
        store: Arc<dyn PairStore>,
        registry: ConnectionRegistry,
        notifier: Notifier,
        metrics: Arc<RelayMetrics>,
        max_duration_secs: u32,
    ) -> Self {
        Self {
            pairing,
            store,
            registry,
            notifier,
            metrics,
            max_duration_secs,
        }
    }

    /// Send a love event from `sender` to their partner.
    pub async fn send_love(&self, sender: UserId, duration_seconds: i64) -> ServiceResult<LoveEvent> {
        let pair = self
            .pairing
            .active_pair(sender)
            .await?
            .ok_or_else(|| ServiceError::Conflict("no pair".to_string()))?;

        let partner = pair.partner_of(&sender).ok_or_else(|| {
            ServiceError::Internal(format!("active pair {} does not contain {sender}", pair.id))
        })?;

        let duration = self.validate_duration(duration_seconds)?;

        let event = self.store.insert_event(&pair.id, &sender, duration).await?;
        self.metrics.love_events_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            event = %event.id,
            pair = %pair.id,
            sender = %sender,
            duration,
            "Love event stored"
        );

        self.deliver_live(partner, &event).await;

        let sender_name = event
            .sender
            .as_ref()
            .map(|s| s.username.as_str())
            .unwrap_or("Your partner");
        self.notifier
            .enqueue(self.notifier.love_event(partner, sender_name, duration));
        self.metrics
            .notifications_enqueued_total
            .fetch_add(1, Ordering::Relaxed);

        Ok(event)
    }

    /// Events of every pair `user` is or was in, newest first.
    pub async fn history(&self, user: UserId) -> ServiceResult<Vec<LoveEvent>> {
        Ok(self.store.history_for(&user, HISTORY_LIMIT).await?)
    }

    /// Aggregates over the active pair's events; zeros when unpaired.
    pub async fn stats(&self, user: UserId) -> ServiceResult<LoveStats> {
        match self.pairing.active_pair(user).await? {
            Some(pair) => Ok(self.store.pair_stats(&pair.id).await?),
            None => Ok(LoveStats::default()),
        }
    }

    fn validate_duration(&self, duration_seconds: i64) -> ServiceResult<u32> {
        if duration_seconds < 1 {
            return Err(ServiceError::Validation(
                "duration_seconds must be at least 1".to_string(),
            ));
        }
        match u32::try_from(duration_seconds) {
            Ok(d) if d <= self.max_duration_secs => Ok(d),
            _ => Err(ServiceError::Validation(format!(
                "duration_seconds must be at most {}",
                self.max_duration_secs
            ))),
        }
    }

    async fn deliver_live(&self, partner: UserId, event: &LoveEvent) {
        let frame = match LiveFrame::LoveEvent(event.clone()).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(event = %event.id, error = %e, "Failed to encode live frame");
                return;
            }
        };

        if self.registry.send_to_user(partner, Arc::from(frame)).await {
            self.metrics
                .live_deliveries_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event = %event.id, partner = %partner, "Live frame queued");
        } else {
            self.metrics.live_misses_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event = %event.id, partner = %partner, "Partner not connected");
        }
    }
}

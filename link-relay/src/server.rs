//! Main LoveRelay coordination.
//!
//! LoveRelay wires the store, the pairing service, the connection registry
//! and the event router together and is shared by every HTTP handler.

use crate::config::Config;
use crate::error::ServiceResult;
use crate::events::EventRouter;
use crate::http::auth::{HeaderIdentity, IdentityResolver};
use crate::limits::{RateLimitError, RateLimits};
use crate::notify::{dispatcher_from_config, NotificationDispatcher, Notifier};
use crate::pairing::PairingService;
use crate::registry::ConnectionRegistry;
use crate::storage::{PairStore, SqliteStorage};
use link_types::{LoveEvent, PairRequest, RequestId, RespondOutcome, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Love events stored.
    pub love_events_total: AtomicU64,
    /// Love events queued on the partner's live connection.
    pub live_deliveries_total: AtomicU64,
    /// Love events whose partner had no live connection.
    pub live_misses_total: AtomicU64,
    /// Push notifications handed to the dispatcher.
    pub notifications_enqueued_total: AtomicU64,
    /// Pair requests created.
    pub pair_requests_total: AtomicU64,
    /// Pairs formed by accepting a request.
    pub pairs_formed_total: AtomicU64,
    /// Requests refused by a rate limiter.
    pub rate_limit_hits: AtomicU64,
    /// Requests that failed with an internal error.
    pub errors_total: AtomicU64,
    /// Live connections accepted.
    pub connections_total: AtomicU64,
}

/// Main relay server.
pub struct LoveRelay {
    config: Config,
    store: Arc<dyn PairStore>,
    pairing: PairingService,
    registry: ConnectionRegistry,
    events: EventRouter,
    notifier: Notifier,
    rate_limits: RateLimits,
    metrics: Arc<RelayMetrics>,
    identity: Arc<dyn IdentityResolver>,
}

impl std::fmt::Debug for LoveRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoveRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl LoveRelay {
    /// Create a relay. Must be called inside a tokio runtime (the
    /// connection registry task is spawned here).
    pub fn new(
        config: Config,
        store: Arc<dyn PairStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::default());
        let pairing = PairingService::new(store.clone());
        let (registry, _registry_task) = ConnectionRegistry::spawn(config.realtime.control_buffer);
        let notifier = Notifier::new(dispatcher, config.notifications.title.clone());
        let events = EventRouter::new(
            pairing.clone(),
            store.clone(),
            registry.clone(),
            notifier.clone(),
            metrics.clone(),
            config.limits.max_duration_secs,
        );
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(HeaderIdentity::new(config.auth.identity_header.clone()));

        Self {
            rate_limits: RateLimits::new(&config.limits),
            config,
            store,
            pairing,
            registry,
            events,
            notifier,
            metrics,
            identity,
        }
    }

    /// Open the configured database and push transport, then build the relay.
    pub async fn from_config(config: Config) -> crate::error::Result<Self> {
        let storage =
            SqliteStorage::new(&config.storage.database, config.storage.max_connections).await?;
        let dispatcher = dispatcher_from_config(&config.notifications)?;
        Ok(Self::new(config, Arc::new(storage), dispatcher))
    }

    /// Replace the identity resolver.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn store(&self) -> &Arc<dyn PairStore> {
        &self.store
    }

    /// Pairing lifecycle operations.
    pub fn pairing(&self) -> &PairingService {
        &self.pairing
    }

    /// Love event routing.
    pub fn events(&self) -> &EventRouter {
        &self.events
    }

    /// Live connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Resolver used to authenticate API callers.
    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    /// Create a pair request and notify the requested user.
    pub async fn request_pair(
        &self,
        requester: UserId,
        identifier: &str,
    ) -> ServiceResult<PairRequest> {
        self.limited(self.rate_limits.check_pair_request(&requester))?;

        let request = self.pairing.create_request(requester, identifier).await?;
        self.metrics.pair_requests_total.fetch_add(1, Ordering::Relaxed);

        let requester_name = request
            .requester
            .as_ref()
            .map(|u| u.username.as_str())
            .unwrap_or("Someone");
        self.notifier.enqueue(
            self.notifier
                .pair_request(request.requested_id, requester_name),
        );
        self.metrics
            .notifications_enqueued_total
            .fetch_add(1, Ordering::Relaxed);

        Ok(request)
    }

    /// Accept or reject a pair request.
    pub async fn respond_to_request(
        &self,
        request_id: RequestId,
        responder: UserId,
        accept: bool,
    ) -> ServiceResult<RespondOutcome> {
        let outcome = self.pairing.respond(request_id, responder, accept).await?;
        if matches!(outcome, RespondOutcome::Paired(_)) {
            self.metrics.pairs_formed_total.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// Send a love event, subject to the sender's rate limit.
    pub async fn send_love(&self, sender: UserId, duration_seconds: i64) -> ServiceResult<LoveEvent> {
        self.limited(self.rate_limits.check_love(&sender))?;
        self.events.send_love(sender, duration_seconds).await
    }

    /// Apply the global limiter to one API call.
    pub fn check_global(&self) -> ServiceResult<()> {
        self.limited(self.rate_limits.check_global())
    }

    fn limited(&self, check: Result<(), RateLimitError>) -> ServiceResult<()> {
        check.map_err(|e| {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(reason = %e, "Rate limit hit");
            e.into()
        })
    }
}

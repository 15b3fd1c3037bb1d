//! Pair request state machine and the one-active-pair-per-user rule.
//!
//! Requests move `Pending -> Accepted | Rejected` and never leave a terminal
//! state. The checks that must hold together (nobody already paired, no
//! duplicate pending request, a request accepted at most once) run inside
//! single store transactions; this layer resolves identifiers and turns
//! store outcomes into [`ServiceError`]s.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::{PairStore, RequestInsert, ResponseOutcome};
use link_types::{Ack, Pair, PairId, PairRequest, RequestId, RespondOutcome, UserId, UserSummary};
use std::sync::Arc;

/// Pairing lifecycle operations.
#[derive(Clone)]
pub struct PairingService {
    store: Arc<dyn PairStore>,
}

impl std::fmt::Debug for PairingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingService").finish_non_exhaustive()
    }
}

impl PairingService {
    /// Create a service over `store`.
    pub fn new(store: Arc<dyn PairStore>) -> Self {
        Self { store }
    }

    /// Ask the user named by `identifier` to pair with `requester`.
    ///
    /// `identifier` is a user id or a username (case-insensitive).
    pub async fn create_request(
        &self,
        requester: UserId,
        identifier: &str,
    ) -> ServiceResult<PairRequest> {
        let target = self.resolve_target(identifier).await?;
        if target.id == requester {
            return Err(ServiceError::SelfPair);
        }

        match self.store.insert_request(&requester, &target.id).await? {
            RequestInsert::Created(request) => {
                tracing::info!(
                    request = %request.id,
                    requester = %requester,
                    requested = %target.id,
                    "Pair request created"
                );
                Ok(request)
            }
            RequestInsert::AlreadyPaired(user) if user == requester => Err(
                ServiceError::Conflict("you are already in a pair".to_string()),
            ),
            RequestInsert::AlreadyPaired(_) => Err(ServiceError::Conflict(
                "user is already in a pair".to_string(),
            )),
            RequestInsert::AlreadyPending => Err(ServiceError::Conflict(
                "a pending request already exists between these users".to_string(),
            )),
        }
    }

    /// Accept or reject a pending request addressed to `responder`.
    pub async fn respond(
        &self,
        request_id: RequestId,
        responder: UserId,
        accept: bool,
    ) -> ServiceResult<RespondOutcome> {
        let request = self
            .store
            .get_request(&request_id)
            .await?
            .filter(|request| request.requested_id == responder)
            .ok_or_else(request_not_found)?;
        let next = request
            .status
            .respond(accept)
            .ok_or_else(request_not_found)?;

        match self
            .store
            .respond_request(&request_id, &responder, request.status, next)
            .await?
        {
            ResponseOutcome::Accepted(pair) => {
                tracing::info!(
                    request = %request_id,
                    pair = %pair.id,
                    "Pair request accepted"
                );
                Ok(RespondOutcome::Paired(pair))
            }
            ResponseOutcome::Rejected => {
                tracing::info!(request = %request_id, responder = %responder, "Pair request rejected");
                Ok(RespondOutcome::Rejected(Ack::new("Pair request rejected")))
            }
            // Another response won the race.
            ResponseOutcome::Stale => Err(request_not_found()),
            ResponseOutcome::AlreadyPaired(user) => {
                tracing::debug!(request = %request_id, user = %user, "Accept blocked by existing pair");
                Err(ServiceError::Conflict(
                    "one of the users is already in a pair".to_string(),
                ))
            }
        }
    }

    /// Pending requests addressed to `user`, newest first.
    pub async fn list_pending(&self, user: UserId) -> ServiceResult<Vec<PairRequest>> {
        Ok(self.store.pending_requests_for(&user).await?)
    }

    /// The user's active pair, if any.
    pub async fn active_pair(&self, user: UserId) -> ServiceResult<Option<Pair>> {
        Ok(self.store.active_pair_for(&user).await?)
    }

    /// Dissolve `pair_id` on behalf of `requester`.
    ///
    /// Dissolving an already dissolved pair succeeds without changes.
    pub async fn dissolve(&self, pair_id: PairId, requester: UserId) -> ServiceResult<()> {
        let record = self
            .store
            .get_pair(&pair_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("pair not found".to_string()))?;

        if !record.pair.has_member(&requester) {
            return Err(ServiceError::Authorization(
                "not a member of this pair".to_string(),
            ));
        }
        if record.dissolved_at.is_some() {
            return Ok(());
        }

        if self.store.dissolve_pair(&pair_id).await? {
            tracing::info!(pair = %pair_id, by = %requester, "Pair dissolved");
        }
        Ok(())
    }

    /// Dissolve whatever pair `user` is currently in.
    pub async fn dissolve_current(&self, user: UserId) -> ServiceResult<()> {
        let pair = self
            .active_pair(user)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no active pair".to_string()))?;
        self.dissolve(pair.id, user).await
    }

    async fn resolve_target(&self, identifier: &str) -> ServiceResult<UserSummary> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ServiceError::Validation(
                "identifier is required".to_string(),
            ));
        }

        let found = match identifier.parse::<UserId>() {
            Ok(id) => self.store.get_user(&id).await?,
            Err(_) => self.store.find_user_by_username(identifier).await?,
        };

        found.ok_or_else(|| ServiceError::NotFound("user not found".to_string()))
    }
}

fn request_not_found() -> ServiceError {
    ServiceError::NotFound("pending pair request not found".to_string())
}

//! Storage layer for heartlink-relay.
//!
//! The store is the single source of truth for users, pairs, pair requests
//! and love events. Operations that must be atomic (request creation,
//! acceptance, dissolution) are exposed as single trait methods so the
//! backend can run them inside one transaction.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use link_types::{
    LoveEvent, LoveStats, Pair, PairId, PairRequest, RequestId, RequestStatus, UserId,
    UserSummary,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of inserting a pending pair request.
#[derive(Debug, Clone)]
pub enum RequestInsert {
    /// The request was stored as pending.
    Created(PairRequest),
    /// This user already belongs to an active pair.
    AlreadyPaired(UserId),
    /// A pending request already exists between the two users.
    AlreadyPending,
}

/// Outcome of moving a pair request out of its current status.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// The request is now accepted and this pair was created.
    Accepted(Pair),
    /// The request is now rejected.
    Rejected,
    /// The request is not addressed to the responder or is no longer in the
    /// expected status. Nothing was changed.
    Stale,
    /// This member is already paired; nothing was changed.
    AlreadyPaired(UserId),
}

/// A pair together with its dissolution state.
#[derive(Debug, Clone)]
pub struct PairRecord {
    /// The pair.
    pub pair: Pair,
    /// When the pair was dissolved, if it was.
    pub dissolved_at: Option<i64>,
}

/// Row counts for health and metrics reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCounts {
    /// Registered users.
    pub users: u64,
    /// Pairs that have not been dissolved.
    pub active_pairs: u64,
    /// Love events ever recorded.
    pub love_events: u64,
}

/// Trait for pairing storage backends.
#[async_trait]
pub trait PairStore: Send + Sync {
    /// Insert a user with a unique (case-insensitive) username.
    async fn create_user(&self, username: &str) -> Result<UserSummary, StorageError>;

    /// Look up a user by id.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserSummary>, StorageError>;

    /// Look up a user by username, ignoring case.
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserSummary>, StorageError>;

    /// Atomically check that neither user is paired and insert a pending request.
    async fn insert_request(
        &self,
        requester: &UserId,
        requested: &UserId,
    ) -> Result<RequestInsert, StorageError>;

    /// Atomically move a request addressed to `responder` from `from` to `to`.
    ///
    /// The change only applies while the stored status is still `from`.
    /// Moving to `Accepted` also creates the pair in the same transaction.
    /// Fails with [`StorageError::InvalidTransition`] if the lifecycle does
    /// not allow `from -> to`.
    async fn respond_request(
        &self,
        request_id: &RequestId,
        responder: &UserId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<ResponseOutcome, StorageError>;

    /// Get a request by id regardless of status.
    async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<PairRequest>, StorageError>;

    /// Pending requests addressed to a user, newest first.
    async fn pending_requests_for(&self, user_id: &UserId)
        -> Result<Vec<PairRequest>, StorageError>;

    /// The user's active (not dissolved) pair.
    async fn active_pair_for(&self, user_id: &UserId) -> Result<Option<Pair>, StorageError>;

    /// Get a pair by id, including dissolved pairs.
    async fn get_pair(&self, pair_id: &PairId) -> Result<Option<PairRecord>, StorageError>;

    /// Mark a pair dissolved and release both members.
    ///
    /// Returns `false` if the pair was already dissolved or does not exist.
    async fn dissolve_pair(&self, pair_id: &PairId) -> Result<bool, StorageError>;

    /// Persist a love event bound to `pair_id`.
    async fn insert_event(
        &self,
        pair_id: &PairId,
        sender: &UserId,
        duration_seconds: u32,
    ) -> Result<LoveEvent, StorageError>;

    /// Events of every pair the user is or was a member of, newest first.
    async fn history_for(&self, user_id: &UserId, limit: u32)
        -> Result<Vec<LoveEvent>, StorageError>;

    /// Aggregate counters over one pair's events.
    async fn pair_stats(&self, pair_id: &PairId) -> Result<LoveStats, StorageError>;

    /// Check that the database answers.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Row counts for metrics.
    async fn counts(&self) -> Result<StoreCounts, StorageError>;
}

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

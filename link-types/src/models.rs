//! Domain records exchanged over the HTTP API and live channel.
//!
//! All timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Ack, EventId, PairId, RequestId, TypesError, UserId};

/// Public view of a user, attached to requests, pairs and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User identifier.
    pub id: UserId,
    /// Unique display name.
    pub username: String,
    /// Registration time.
    pub created_at: i64,
}

/// Lifecycle state of a [`PairRequest`].
///
/// `Pending` moves exactly once to `Accepted` or `Rejected`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting a response from the requested user.
    Pending,
    /// Accepted; a pair was formed.
    Accepted,
    /// Rejected by the requested user.
    Rejected,
}

impl RequestStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// The state reached by responding, or `None` if already terminal.
    pub fn respond(self, accept: bool) -> Option<RequestStatus> {
        match (self, accept) {
            (RequestStatus::Pending, true) => Some(RequestStatus::Accepted),
            (RequestStatus::Pending, false) => Some(RequestStatus::Rejected),
            (RequestStatus::Accepted | RequestStatus::Rejected, _) => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

/// A proposal from one user to form a pair with another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    /// Request identifier.
    pub id: RequestId,
    /// User who sent the request.
    pub requester_id: UserId,
    /// User the request is addressed to.
    pub requested_id: UserId,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// Creation time.
    pub created_at: i64,
    /// Time of the last status change.
    pub updated_at: i64,
    /// Requester summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<UserSummary>,
    /// Requested user summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<UserSummary>,
}

/// A confirmed, exclusive two-user relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// Pair identifier.
    pub id: PairId,
    /// The member who sent the request.
    pub user1_id: UserId,
    /// The member who accepted it.
    pub user2_id: UserId,
    /// Summary of `user1_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user1: Option<UserSummary>,
    /// Summary of `user2_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user2: Option<UserSummary>,
    /// Creation time.
    pub created_at: i64,
}

impl Pair {
    /// Whether `user` is one of the two members.
    pub fn has_member(&self, user: &UserId) -> bool {
        self.user1_id == *user || self.user2_id == *user
    }

    /// The other member, or `None` if `user` is not in this pair.
    pub fn partner_of(&self, user: &UserId) -> Option<UserId> {
        if self.user1_id == *user {
            Some(self.user2_id)
        } else if self.user2_id == *user {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

/// Result of responding to a pair request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RespondOutcome {
    /// The request was accepted and this pair was created.
    Paired(Pair),
    /// The request was rejected.
    Rejected(Ack),
}

/// A duration-tagged signal from one pair member to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoveEvent {
    /// Event identifier.
    pub id: EventId,
    /// Pair that owned the event when it was sent.
    pub pair_id: PairId,
    /// Sending member.
    pub sender_id: UserId,
    /// Sender summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    /// How long the heart button was held, in seconds.
    pub duration_seconds: u32,
    /// Creation time.
    pub created_at: i64,
}

/// Aggregates over the events of a user's active pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoveStats {
    /// Number of events.
    pub total_events: u64,
    /// Sum of all durations in seconds.
    pub total_duration_seconds: u64,
    /// Mean duration in seconds (0 when there are no events).
    pub average_duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: UserId, b: UserId) -> Pair {
        Pair {
            id: PairId::new(),
            user1_id: a,
            user2_id: b,
            user1: None,
            user2: None,
            created_at: 0,
        }
    }

    #[test]
    fn pending_transitions_once() {
        assert_eq!(
            RequestStatus::Pending.respond(true),
            Some(RequestStatus::Accepted)
        );
        assert_eq!(
            RequestStatus::Pending.respond(false),
            Some(RequestStatus::Rejected)
        );
        assert_eq!(RequestStatus::Accepted.respond(false), None);
        assert_eq!(RequestStatus::Rejected.respond(true), None);
    }

    #[test]
    fn status_round_trips_through_storage_string() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn partner_is_the_other_member() {
        let a = UserId::new();
        let b = UserId::new();
        let p = pair(a, b);
        assert_eq!(p.partner_of(&a), Some(b));
        assert_eq!(p.partner_of(&b), Some(a));
        assert_eq!(p.partner_of(&UserId::new()), None);
        assert!(p.has_member(&a));
        assert!(!p.has_member(&UserId::new()));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RequestStatus::Accepted).unwrap();
        assert_eq!(json, "\"accepted\"");
    }

    #[test]
    fn rejected_outcome_serializes_as_message() {
        let outcome = RespondOutcome::Rejected(Ack::new("Pair request rejected"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["message"], "Pair request rejected");
    }

    #[test]
    fn missing_summaries_are_omitted() {
        let p = pair(UserId::new(), UserId::new());
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("user1").is_none());
        assert!(json.get("user1_id").is_some());
    }
}

//! # heartlink-types
//!
//! Wire format and domain types shared by the heartlink relay and its clients.
//!
//! - [`UserId`], [`PairId`], [`RequestId`], [`EventId`] - identity types
//! - [`Pair`], [`PairRequest`], [`LoveEvent`], [`LoveStats`] - domain records
//! - [`ApiResponse`] - the `{success, data?, error?}` envelope
//! - [`LiveFrame`] - frames pushed over the live channel

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod frames;
mod ids;
mod models;

pub use envelope::{Ack, ApiResponse};
pub use error::TypesError;
pub use frames::LiveFrame;
pub use ids::{EventId, PairId, RequestId, UserId};
pub use models::{
    LoveEvent, LoveStats, Pair, PairRequest, RequestStatus, RespondOutcome, UserSummary,
};

//! # heartlink-relay
//!
//! Pairing and real-time love-event relay for heartlink.
//!
//! Two users form an exclusive pair and send each other short "love"
//! signals. The relay:
//! - runs the pair request lifecycle (`Pending -> Accepted | Rejected`)
//!   and keeps every user in at most one active pair
//! - stores love events and answers history and stats queries
//! - pushes each event to the partner's live WebSocket, if connected
//! - queues a push notification for every event and pair request
//!
//! ## Architecture
//!
//! ```text
//!  HTTP / WS ──► LoveRelay ──► PairingService ──► SQLite
//!                   │              ▲
//!                   ▼              │
//!              EventRouter ────────┘
//!               │        │
//!               ▼        ▼
//!   ConnectionRegistry  Notifier ──► NotificationDispatcher
//!      (actor task)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod limits;
pub mod notify;
pub mod pairing;
pub mod registry;
pub mod server;
pub mod storage;

//! Frames pushed to clients over the live channel.

use serde::{Deserialize, Serialize};

use crate::LoveEvent;

/// A server-to-client frame on the `/ws` channel.
///
/// Serialized as `{"type": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveFrame {
    /// The partner sent a love event.
    LoveEvent(LoveEvent),
}

impl LiveFrame {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

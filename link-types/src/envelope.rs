//! Response envelope used by every HTTP endpoint.

use serde::{Deserialize, Serialize};

/// The `{success, data?, error?}` wrapper around every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// User-facing message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Plain acknowledgement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Human-readable confirmation.
    pub message: String,
}

impl Ack {
    /// Create an acknowledgement.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error() {
        let json = serde_json::to_value(ApiResponse::ok(5u32)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 5}));
    }

    #[test]
    fn failure_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::failure("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn null_data_is_preserved_for_optional_payloads() {
        // GET /pairs/current answers `data: null` when unpaired
        let response: ApiResponse<Option<u32>> = ApiResponse::ok(None);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.as_object().unwrap().contains_key("data"));
        assert!(json["data"].is_null());
    }
}

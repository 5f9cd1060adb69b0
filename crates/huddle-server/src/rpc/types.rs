//! RPC wire-format types shared by `POST /rpc` and the hub's pushed events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming RPC request from a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Caller-chosen request identifier, echoed back.
    pub id: String,
    /// Method name (e.g. `session.create`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload (present when `success == true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (present when `success == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error body inside an [`RpcResponse`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Machine-readable error code (e.g. `NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Server-pushed event on a live connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcEvent {
    /// Event type (e.g. `participant.joined`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Session the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(
        id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(RpcErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

impl RpcEvent {
    /// Create a new event with the current UTC timestamp.
    pub fn new(
        event_type: impl Into<String>,
        session_id: Option<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            session_id,
            timestamp: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }

    /// Serialize to the text frame sent to clients.
    pub fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(
                    event_type = %self.event_type,
                    error = %e,
                    "failed to serialize event"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_params() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"id":"r1","method":"system.ping"}"#).unwrap();
        assert_eq!(req.method, "system.ping");
        assert!(req.params.is_none());
    }

    #[test]
    fn success_response_omits_error() {
        let resp = RpcResponse::success("r1", json!({"pong": true}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["result"]["pong"], true);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn error_response_omits_result() {
        let resp = RpcResponse::error("r2", "NOT_FOUND", "No game with code X exists");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert!(v.get("result").is_none());
    }

    #[test]
    fn event_frame_shape() {
        let event = RpcEvent::new(
            "participant.joined",
            Some("AB3F9".into()),
            Some(json!({"userId": "u1"})),
        );
        let frame = event.to_frame().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "participant.joined");
        assert_eq!(v["sessionId"], "AB3F9");
        assert_eq!(v["data"]["userId"], "u1");
        assert!(v["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}

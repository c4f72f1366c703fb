//! Wire envelopes shared by the bridge, the host process, and clients.
//!
//! Two envelope pairs exist: the framed-channel pair (`CommandEnvelope` /
//! `ResponseEnvelope`, correlated by an integer `requestId` the bridge
//! allocates) and the WebSocket pair (`WsRequest` / `WsReply`, correlated by
//! the client's own string `wsRequestId`). The bridge translates between the
//! two; host and clients never see each other's correlation scheme.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-bound command carried on the framed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub request_id: u64,
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Exactly one of these is produced per `CommandEnvelope`, either by the
/// host or synthesized by the bridge on timeout/disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: u64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(request_id: u64, result: Value) -> Self {
        Self {
            request_id,
            status: Status::Ok,
            result: Some(result),
            error: None,
            details: None,
            tab_id: None,
        }
    }

    pub fn error(request_id: u64, error: impl Into<String>) -> Self {
        Self {
            request_id,
            status: Status::Error,
            result: None,
            error: Some(error.into()),
            details: None,
            tab_id: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_tab(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }
}

/// Client-to-bridge WebSocket frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsRequest {
    pub ws_request_id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

/// Bridge-to-client WebSocket frame. `wsRequestId` always echoes the inbound
/// value so clients can correlate regardless of host-side numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsReply {
    pub ws_request_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl WsReply {
    pub fn from_response(ws_request_id: String, resp: ResponseEnvelope) -> Self {
        Self {
            ws_request_id,
            status: resp.status,
            result: resp.result,
            error: resp.error,
            details: resp.details,
            tab_id: resp.tab_id,
        }
    }

    /// Reply synthesized by the bridge itself, never seen by the host.
    pub fn local_error(ws_request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ws_request_id: ws_request_id.into(),
            status: Status::Error,
            result: None,
            error: Some(error.into()),
            details: None,
            tab_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_envelope_wire_shape() {
        let resp = ResponseEnvelope::ok(7, serde_json::json!({"url": "about:blank"}))
            .with_tab("t-1");
        let raw = serde_json::to_value(&resp).unwrap();
        assert_eq!(raw["requestId"], 7);
        assert_eq!(raw["status"], "ok");
        assert_eq!(raw["tabId"], "t-1");
        assert!(raw.get("error").is_none());
    }

    #[test]
    fn test_command_envelope_optional_fields() {
        let raw = r#"{"requestId": 3, "command": "list-open-tabs"}"#;
        let env: CommandEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.request_id, 3);
        assert_eq!(env.command, "list-open-tabs");
        assert!(env.params.is_null());
        assert!(env.tab_id.is_none());
    }

    #[test]
    fn test_ws_reply_echoes_request_id() {
        let reply = WsReply::from_response(
            "req-42".to_string(),
            ResponseEnvelope::error(9, "request timed out"),
        );
        assert_eq!(reply.ws_request_id, "req-42");
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.error.as_deref(), Some("request timed out"));
    }
}

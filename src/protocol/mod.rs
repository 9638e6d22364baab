//! JSON-RPC 2.0 envelope types shared by both transports.
//!
//! Requests are immutable once decoded and discarded after dispatch. A
//! response carries exactly one of `result` or `error`; notifications
//! (null or absent id) produce no response envelope at all.

pub mod dispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use dispatcher::{Dispatcher, Method};

/// Version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Request/response identifier, echoed back verbatim with type preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// Decoded request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Null or absent id marks a notification expecting no response.
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Notifications are processed for side effects only.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Response envelope. `result` and `error` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Copied from the request; null only for parse errors where no id
    /// could be recovered.
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Error payload with a reserved numeric code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Build a success envelope echoing the request id.
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error envelope echoing the request id.
    pub fn failure(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Parse-error envelope for bytes that never yielded a request id.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::failure(None, -32700, format!("parse error: {}", detail.into()))
    }
}

/// Boundary through which a transport delivers decoded requests.
///
/// The HTTP transport requires a handler at construction and invokes it per
/// request; the stdio transport is pumped externally by the serve loop.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request. Returns `None` for notifications (no envelope is
    /// produced). The only error is scope cancellation; protocol faults are
    /// answered as error envelopes.
    async fn handle(
        &self,
        request: JsonRpcRequest,
        scope: &CancellationToken,
    ) -> crate::Result<Option<JsonRpcResponse>>;
}

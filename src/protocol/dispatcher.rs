//! Protocol dispatcher — routes a decoded request to its handler and
//! builds the response envelope.
//!
//! Methods form a closed enum matched exhaustively, so adding a method is
//! a compile-time-checked decision rather than a stringly-typed branch.
//! The dispatcher is stateless; nothing persists across calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::bridge::CommandBridge;
use crate::catalog::ToolCatalog;
use crate::error::QuillError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestHandler, PROTOCOL_VERSION};

/// The methods this server routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    /// Any `notifications/*` method; side effects only.
    Notification,
}

impl Method {
    /// Parse a wire method name. `None` maps to -32601.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initialize" => Some(Method::Initialize),
            "ping" => Some(Method::Ping),
            "tools/list" => Some(Method::ToolsList),
            "tools/call" => Some(Method::ToolsCall),
            _ if raw.starts_with("notifications/") => Some(Method::Notification),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: serde_json::Map<String, serde_json::Value>,
}

/// Stateless method router backed by the tool catalog and command bridge.
pub struct Dispatcher {
    server_name: String,
    server_version: String,
    catalog: Arc<dyn ToolCatalog>,
    bridge: Arc<CommandBridge>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<dyn ToolCatalog>, bridge: Arc<CommandBridge>) -> Self {
        Self {
            server_name: "quill-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            catalog,
            bridge,
        }
    }

    fn initialize_result(&self) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
        })
    }

    fn tools_list_result(&self) -> serde_json::Value {
        let tools: Vec<serde_json::Value> = self
            .catalog
            .list_tools()
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        serde_json::json!({ "tools": tools })
    }

    /// Execute a tool call, folding every tool-level failure into a
    /// successful envelope with `isError = true` so the calling model sees
    /// the failure text instead of an opaque fault.
    async fn tools_call_result(
        &self,
        params: Option<serde_json::Value>,
        scope: &CancellationToken,
    ) -> crate::Result<std::result::Result<serde_json::Value, String>> {
        let params: ToolCallParams = match params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
        {
            Ok(p) => p,
            Err(detail) => return Ok(Err(format!("invalid params: {}", detail))),
        };

        let Some(invocation) = self.catalog.build_invocation(&params.name, &params.arguments)
        else {
            return Ok(Err(format!("unknown tool: {}", params.name)));
        };

        let outcome = self.bridge.execute_command(invocation, scope).await;
        let (text, is_error) = match outcome {
            Ok(response) => {
                let mut text = response.stdout.clone();
                if let Some(err) = &response.error {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(err);
                }
                (text, !response.is_success())
            }
            Err(QuillError::Cancelled) => return Err(QuillError::Cancelled),
            // Validation rejections and workspace faults are tool-level
            // failures, not protocol errors.
            Err(e) => (e.to_string(), true),
        };

        Ok(Ok(serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error,
        })))
    }

    /// Process a notification for side effects only.
    async fn handle_notification(
        &self,
        request: &JsonRpcRequest,
        scope: &CancellationToken,
    ) -> crate::Result<()> {
        match Method::parse(&request.method) {
            Some(Method::ToolsCall) => {
                // Fire-and-forget execution; there is nowhere to report to.
                match self.tools_call_result(request.params.clone(), scope).await? {
                    Ok(_) => {}
                    Err(detail) => {
                        tracing::warn!(detail = %detail, "tool-call notification rejected");
                    }
                }
            }
            Some(method) => {
                tracing::debug!(method = ?method, "notification received");
            }
            None => {
                tracing::debug!(method = %request.method, "unknown notification ignored");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(
        &self,
        request: JsonRpcRequest,
        scope: &CancellationToken,
    ) -> crate::Result<Option<JsonRpcResponse>> {
        // Scope check precedes any routing.
        if scope.is_cancelled() {
            return Err(QuillError::Cancelled);
        }

        if request.is_notification() {
            self.handle_notification(&request, scope).await?;
            return Ok(None);
        }

        let id = request.id.clone();
        let response = match Method::parse(&request.method) {
            None => JsonRpcResponse::failure(
                id,
                -32601,
                format!("method not found: {}", request.method),
            ),
            Some(Method::Initialize) => JsonRpcResponse::success(id, self.initialize_result()),
            Some(Method::Ping) => {
                JsonRpcResponse::success(id, serde_json::json!({ "status": "ok" }))
            }
            Some(Method::ToolsList) => JsonRpcResponse::success(id, self.tools_list_result()),
            Some(Method::ToolsCall) => {
                match self.tools_call_result(request.params, scope).await? {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(detail) => JsonRpcResponse::failure(id, -32602, detail),
                }
            }
            // An id-bearing notifications/* request still deserves an
            // acknowledgement so the caller's correlation works.
            Some(Method::Notification) => JsonRpcResponse::success(id, serde_json::json!({})),
        };

        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CommandCatalog;
    use crate::config::{BridgeConfig, ToolConfig};
    use crate::protocol::RequestId;

    fn tool(name: &str, args: &[&str]) -> ToolConfig {
        ToolConfig {
            name: name.to_string(),
            description: String::new(),
            args: args.iter().map(|s| s.to_string()).collect(),
            input_schema: None,
        }
    }

    fn dispatcher(base: &std::path::Path, command: &str, tools: &[ToolConfig]) -> Dispatcher {
        let catalog = CommandCatalog::new(command, tools).into_shared();
        let bridge = Arc::new(CommandBridge::new(BridgeConfig {
            command: command.to_string(),
            allowed_commands: vec!["echo".to_string(), "sh".to_string()],
            working_dir: base.to_path_buf(),
            max_timeout_secs: 5,
        }));
        Dispatcher::new(catalog, bridge)
    }

    fn request(id: Option<RequestId>, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_method_parse_known_methods() {
        assert_eq!(Method::parse("initialize"), Some(Method::Initialize));
        assert_eq!(Method::parse("ping"), Some(Method::Ping));
        assert_eq!(Method::parse("tools/list"), Some(Method::ToolsList));
        assert_eq!(Method::parse("tools/call"), Some(Method::ToolsCall));
        assert_eq!(
            Method::parse("notifications/initialized"),
            Some(Method::Notification)
        );
        assert_eq!(Method::parse("resources/list"), None);
    }

    #[tokio::test]
    async fn test_ping_returns_ok_marker_with_echoed_id() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(request(Some(RequestId::Number(1)), "ping", None), &scope)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resp.id, Some(RequestId::Number(1)));
        assert_eq!(resp.result.unwrap(), serde_json::json!({"status": "ok"}));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_string_id_preserved_exactly() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(Some(RequestId::String("abc-123".into())), "ping", None),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.id, Some(RequestId::String("abc-123".into())));
    }

    #[tokio::test]
    async fn test_initialize_reports_identity_and_capabilities() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(request(Some(RequestId::Number(1)), "initialize", None), &scope)
            .await
            .unwrap()
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "quill-mcp");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_method_is_32601() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(Some(RequestId::Number(2)), "resources/list", None),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn test_notification_produces_no_envelope() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(request(None, "notifications/initialized", None), &scope)
            .await
            .unwrap();
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_maps_catalog_entries() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[tool("echo_args", &[])]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(request(Some(RequestId::Number(3)), "tools/list", None), &scope)
            .await
            .unwrap()
            .unwrap();
        let result = resp.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo_args");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool_is_32602() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(
                    Some(RequestId::Number(4)),
                    "tools/call",
                    Some(serde_json::json!({"name": "nope", "arguments": {}})),
                ),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tools_call_missing_params_is_32602() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(request(Some(RequestId::Number(5)), "tools/call", None), &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tools_call_success_has_output_and_no_error_flag() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[tool("echo_args", &[])]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(
                    Some(RequestId::Number(6)),
                    "tools/call",
                    Some(serde_json::json!({
                        "name": "echo_args",
                        "arguments": {"args": ["hello", "world"]}
                    })),
                ),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();

        let result = resp.result.unwrap();
        assert_eq!(result["isError"], false);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("hello world"));
    }

    #[tokio::test]
    async fn test_tools_call_failure_is_error_result_not_protocol_error() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "sh", &[tool("always_fails", &["-c", "exit 7"])]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(
                    Some(RequestId::Number(7)),
                    "tools/call",
                    Some(serde_json::json!({"name": "always_fails", "arguments": {}})),
                ),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();

        assert!(resp.error.is_none(), "domain failure must not be a protocol error");
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(!result["content"][0]["text"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tools_call_denied_command_surfaces_as_error_result() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[tool("echo_args", &[])]);
        let scope = CancellationToken::new();

        let resp = d
            .handle(
                request(
                    Some(RequestId::Number(8)),
                    "tools/call",
                    Some(serde_json::json!({
                        "name": "echo_args",
                        "arguments": {"args": ["hello; rm -rf /"]}
                    })),
                ),
                &scope,
            )
            .await
            .unwrap()
            .unwrap();

        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("unsafe argument"));
    }

    #[tokio::test]
    async fn test_cancelled_scope_propagates_before_routing() {
        let base = tempfile::TempDir::new().unwrap();
        let d = dispatcher(base.path(), "echo", &[]);
        let scope = CancellationToken::new();
        scope.cancel();

        let result = d
            .handle(request(Some(RequestId::Number(9)), "ping", None), &scope)
            .await;
        assert!(matches!(result, Err(QuillError::Cancelled)));
    }
}

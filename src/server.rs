//! Server runtime — wires transport, dispatcher, and health monitor, and
//! pumps the serve loop.
//!
//! One spawned task per in-flight request; no global serialization beyond
//! what each resource protects itself. A failed request never takes the
//! transport down: protocol faults are answered on the wire and the loop
//! continues.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bridge::CommandBridge;
use crate::catalog::CommandCatalog;
use crate::config::QuillConfig;
use crate::error::QuillError;
use crate::health::checks::{CliProbe, StorageProbe};
use crate::health::{HealthCheck, HealthMonitor};
use crate::protocol::{Dispatcher, JsonRpcResponse, RequestHandler};
use crate::transport::factory::create_transport;
use crate::transport::Transport;

/// Pump requests from a transport through a handler until the transport
/// closes or the scope is cancelled.
///
/// For the stream transport this is the request pump; the HTTP transport
/// delivers requests to its handler internally, so its `receive` simply
/// parks here until closure.
pub async fn run_server(
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RequestHandler>,
    scope: CancellationToken,
) -> crate::Result<()> {
    transport.start(&scope).await?;

    loop {
        let received = tokio::select! {
            _ = scope.cancelled() => break,
            received = transport.receive(&scope) => received,
        };

        match received {
            Ok(request) => {
                let handler = handler.clone();
                let transport = transport.clone();
                let request_scope = scope.child_token();
                tokio::spawn(async move {
                    match handler.handle(request, &request_scope).await {
                        Ok(Some(response)) => {
                            if let Err(e) = transport.send(&request_scope, response).await {
                                tracing::error!(error = %e, "failed to send response");
                            }
                        }
                        // Notification: the transport must not send anything.
                        Ok(None) => {}
                        Err(QuillError::Cancelled) => {
                            tracing::debug!("request handling cancelled");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "request handler faulted");
                        }
                    }
                });
            }
            Err(QuillError::Parse(detail)) => {
                // Malformed input is answered; the connection stays open.
                let response = JsonRpcResponse::parse_error(detail);
                if let Err(e) = transport.send(&scope, response).await {
                    tracing::error!(error = %e, "failed to send parse-error response");
                }
            }
            Err(QuillError::MessageTooLarge { size, limit }) => {
                let response = JsonRpcResponse::failure(
                    None,
                    -32600,
                    format!("invalid request: {} bytes exceeds limit of {}", size, limit),
                );
                if let Err(e) = transport.send(&scope, response).await {
                    tracing::error!(error = %e, "failed to send oversize-rejection response");
                }
            }
            Err(QuillError::Cancelled) => break,
            Err(QuillError::TransportClosed) => {
                tracing::info!("transport closed, serve loop exiting");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "receive failed, serve loop exiting");
                break;
            }
        }
    }

    transport.stop(&scope).await
}

/// Fully wired server: transport, dispatcher, and health monitor built
/// from one validated config.
pub struct McpServer {
    config: QuillConfig,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RequestHandler>,
    health: Arc<HealthMonitor>,
}

impl McpServer {
    pub fn from_config(config: QuillConfig) -> crate::Result<Self> {
        config.validate()?;

        let catalog = CommandCatalog::new(config.bridge.command.clone(), &config.tools).into_shared();
        let bridge = Arc::new(CommandBridge::new(config.bridge.clone()));
        let handler: Arc<dyn RequestHandler> = Arc::new(Dispatcher::new(catalog, bridge));

        let transport = create_transport(&config, Some(handler.clone()))?;

        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(CliProbe::new(
                config.bridge.command.clone(),
                Duration::from_secs(config.health.probe_timeout_secs),
            )),
            Arc::new(StorageProbe::new(config.health.storage_dir.clone())),
        ];
        let health = Arc::new(HealthMonitor::new(checks).with_metrics(transport.metrics()));

        Ok(Self {
            config,
            transport,
            handler,
            health,
        })
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Serve until the scope is cancelled or the transport closes. Health
    /// monitoring runs for the duration of the serve loop.
    pub async fn run(&self, scope: CancellationToken) -> crate::Result<()> {
        self.health
            .start_monitoring(Duration::from_secs(self.config.health.interval_secs))
            .await?;

        let result = run_server(self.transport.clone(), self.handler.clone(), scope).await;

        if let Err(e) = self.health.stop_monitoring().await {
            tracing::warn!(error = %e, "health monitor was not running at shutdown");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CommandBridge;
    use crate::config::{BridgeConfig, ToolConfig, TransportConfig};
    use crate::transport::stdio::StdioTransport;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn handler_for(base: &std::path::Path) -> Arc<dyn RequestHandler> {
        let tools = vec![ToolConfig {
            name: "echo_args".to_string(),
            description: "echo".to_string(),
            args: vec![],
            input_schema: None,
        }];
        let catalog = CommandCatalog::new("echo", &tools).into_shared();
        let bridge = Arc::new(CommandBridge::new(BridgeConfig {
            command: "echo".to_string(),
            allowed_commands: vec!["echo".to_string()],
            working_dir: base.to_path_buf(),
            max_timeout_secs: 5,
        }));
        Arc::new(Dispatcher::new(catalog, bridge))
    }

    /// Serve loop over an in-memory pipe; returns the client halves.
    fn serve_over_pipe(
        base: &std::path::Path,
        scope: &CancellationToken,
    ) -> (
        tokio::task::JoinHandle<crate::Result<()>>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new(
            server_read,
            server_write,
            &TransportConfig::default(),
        ));
        let handler = handler_for(base);
        let loop_scope = scope.clone();
        let task = tokio::spawn(run_server(transport, handler, loop_scope));
        (task, client_write, BufReader::new(client_read))
    }

    #[tokio::test]
    async fn test_ping_round_trip_echoes_id() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, mut client_write, mut client_read) = serve_over_pipe(base.path(), &scope);

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":41,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let mut line = String::new();
        client_read.read_line(&mut line).await.unwrap();
        assert_eq!(
            line.trim_end(),
            r#"{"jsonrpc":"2.0","id":41,"result":{"status":"ok"}}"#
        );

        scope.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_notification_produces_no_wire_output() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, mut client_write, mut client_read) = serve_over_pipe(base.path(), &scope);

        // Notification first; if it produced output, the next line would
        // not correlate to the follow-up ping.
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let mut line = String::new();
        client_read.read_line(&mut line).await.unwrap();
        assert!(line.contains(r#""id":2"#), "first output line was {:?}", line);

        scope.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_line_answered_with_parse_error() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, mut client_write, mut client_read) = serve_over_pipe(base.path(), &scope);

        client_write.write_all(b"{broken\n").await.unwrap();

        let mut line = String::new();
        client_read.read_line(&mut line).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());

        // Connection stays open for the next request.
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        line.clear();
        client_read.read_line(&mut line).await.unwrap();
        assert!(line.contains(r#""id":3"#));

        scope.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tool_call_over_the_wire() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, mut client_write, mut client_read) = serve_over_pipe(base.path(), &scope);

        client_write
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/call\",\
                  \"params\":{\"name\":\"echo_args\",\"arguments\":{\"args\":[\"billed\"]}}}\n",
            )
            .await
            .unwrap();

        let mut line = String::new();
        client_read.read_line(&mut line).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["id"], 4);
        assert_eq!(response["result"]["isError"], false);
        assert!(response["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("billed"));

        scope.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_client_eof_ends_serve_loop() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, client_write, client_read) = serve_over_pipe(base.path(), &scope);

        // Drop the whole client side so the server read half observes EOF.
        // With `tokio::io::split`, the underlying duplex stream stays open
        // until both halves are dropped.
        drop(client_write);
        drop(client_read);
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve loop should exit on EOF")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_ends_serve_loop() {
        let base = tempfile::TempDir::new().unwrap();
        let scope = CancellationToken::new();
        let (task, _client_write, _client_read) = serve_over_pipe(base.path(), &scope);

        scope.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve loop should exit on cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mcp_server_from_config_wires_health() {
        let base = tempfile::TempDir::new().unwrap();
        let mut config = QuillConfig::default();
        config.bridge.working_dir = base.path().to_path_buf();
        config.health.storage_dir = base.path().join("data");

        let server = McpServer::from_config(config).unwrap();
        let snapshot = server.health().check_health().await;
        // The CLI probe fails without a real quill binary; the storage
        // probe warns and creates the data dir. Aggregate is unhealthy.
        assert_eq!(snapshot.checks.len(), 2);
        assert!(base.path().join("data").is_dir());
    }

    #[tokio::test]
    async fn test_mcp_server_rejects_invalid_config() {
        let mut config = QuillConfig::default();
        config.bridge.command = String::new();
        assert!(matches!(
            McpServer::from_config(config),
            Err(QuillError::InvalidConfig(_))
        ));
    }
}

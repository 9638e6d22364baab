//! Transport construction and kind detection.
//!
//! Detection is a pure function over an explicit argument list and
//! environment map so it is testable without touching real process state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{QuillConfig, TransportKind};
use crate::error::QuillError;
use crate::protocol::RequestHandler;
use crate::transport::http::HttpTransport;
use crate::transport::stdio::StdioTransport;
use crate::transport::Transport;

/// Environment variable consulted when no explicit flag or config kind is
/// given. Values are case-folded before comparison.
pub const TRANSPORT_ENV_VAR: &str = "MCP_TRANSPORT";

/// Build the configured transport.
///
/// The HTTP kind requires a handler; construction fails without one. The
/// stdio kind ignores the handler because the serve loop pumps it.
pub fn create_transport(
    config: &QuillConfig,
    handler: Option<Arc<dyn RequestHandler>>,
) -> crate::Result<Arc<dyn Transport>> {
    let kind = config.transport.kind.unwrap_or(TransportKind::Stdio);
    match kind {
        TransportKind::Stdio => Ok(Arc::new(StdioTransport::from_stdio(&config.transport))),
        TransportKind::Http => {
            let handler = handler.ok_or_else(|| {
                QuillError::InvalidTransport(
                    "http transport requires a request handler".to_string(),
                )
            })?;
            Ok(Arc::new(HttpTransport::new(
                config.transport.clone(),
                handler,
            )))
        }
    }
}

/// Detect the transport kind from command-line arguments and environment.
///
/// Precedence, never reordered: explicit flag > MCP_TRANSPORT variable
/// (case-folded) > stdio default. The first recognized flag wins.
pub fn detect_transport(args: &[String], env: &HashMap<String, String>) -> TransportKind {
    for arg in args {
        match arg.as_str() {
            "--stdio" => return TransportKind::Stdio,
            "--http" => return TransportKind::Http,
            _ => {}
        }
    }

    if let Some(value) = env.get(TRANSPORT_ENV_VAR) {
        match value.to_lowercase().as_str() {
            "http" => return TransportKind::Http,
            "stdio" => return TransportKind::Stdio,
            other => {
                tracing::warn!(value = %other, "unrecognized MCP_TRANSPORT value, using stdio");
            }
        }
    }

    TransportKind::Stdio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CommandBridge;
    use crate::catalog::CommandCatalog;
    use crate::config::BridgeConfig;
    use crate::protocol::Dispatcher;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn handler() -> Arc<dyn RequestHandler> {
        let catalog = CommandCatalog::new("quill", &[]).into_shared();
        let bridge = Arc::new(CommandBridge::new(BridgeConfig::default()));
        Arc::new(Dispatcher::new(catalog, bridge))
    }

    #[test]
    fn test_default_is_stdio() {
        assert_eq!(detect_transport(&[], &HashMap::new()), TransportKind::Stdio);
    }

    #[test]
    fn test_flag_selects_kind() {
        assert_eq!(
            detect_transport(&args(&["--http"]), &HashMap::new()),
            TransportKind::Http
        );
        assert_eq!(
            detect_transport(&args(&["--stdio"]), &HashMap::new()),
            TransportKind::Stdio
        );
    }

    #[test]
    fn test_flag_overrides_env() {
        let env = env(&[(TRANSPORT_ENV_VAR, "http")]);
        assert_eq!(
            detect_transport(&args(&["--stdio"]), &env),
            TransportKind::Stdio
        );
    }

    #[test]
    fn test_env_is_case_folded() {
        for value in ["HTTP", "Http", "http"] {
            let env = env(&[(TRANSPORT_ENV_VAR, value)]);
            assert_eq!(detect_transport(&[], &env), TransportKind::Http);
        }
    }

    #[test]
    fn test_unrecognized_env_falls_back_to_stdio() {
        let env = env(&[(TRANSPORT_ENV_VAR, "websocket")]);
        assert_eq!(detect_transport(&[], &env), TransportKind::Stdio);
    }

    #[test]
    fn test_unrelated_args_ignored() {
        let env = env(&[(TRANSPORT_ENV_VAR, "http")]);
        assert_eq!(
            detect_transport(&args(&["--config", "quill.toml"]), &env),
            TransportKind::Http
        );
    }

    #[tokio::test]
    async fn test_create_stdio_transport() {
        let config = QuillConfig::default();
        let transport = create_transport(&config, None).unwrap();
        assert_eq!(transport.kind(), TransportKind::Stdio);
    }

    #[tokio::test]
    async fn test_create_http_without_handler_fails() {
        let mut config = QuillConfig::default();
        config.transport.kind = Some(TransportKind::Http);
        let result = create_transport(&config, None);
        assert!(matches!(result, Err(QuillError::InvalidTransport(_))));
    }

    #[tokio::test]
    async fn test_create_http_with_handler() {
        let mut config = QuillConfig::default();
        config.transport.kind = Some(TransportKind::Http);
        let transport = create_transport(&config, Some(handler())).unwrap();
        assert_eq!(transport.kind(), TransportKind::Http);
    }
}

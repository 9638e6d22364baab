//! quill-mcp — MCP server for the quill invoicing CLI
//! Speaks JSON-RPC 2.0 over STDIO or HTTP, validates and sandboxes every
//! tool invocation before delegating to the wrapped program, and reports
//! continuous health telemetry.

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod transport;

pub use bridge::{CommandBridge, ExecutionRequest, ExecutionResponse};
pub use catalog::{CommandCatalog, ToolCatalog, ToolSpec};
pub use config::{QuillConfig, TransportKind};
pub use error::{QuillError, Result};
pub use health::checks::{CliProbe, StorageProbe};
pub use health::{CheckOutcome, HealthMonitor, HealthSnapshot, HealthStatus};
pub use metrics::TransportMetrics;
pub use protocol::{Dispatcher, JsonRpcRequest, JsonRpcResponse, RequestHandler};
pub use server::{run_server, McpServer};
pub use transport::factory::{create_transport, detect_transport};
pub use transport::Transport;

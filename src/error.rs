//! Error types for quill-mcp server operations.

use thiserror::Error;

/// Main error type for quill-mcp operations
#[derive(Error, Debug)]
pub enum QuillError {
    /// Transport used before `start` was called
    #[error("transport not initialized")]
    NotStarted,

    /// Transport used after `stop`, or the underlying stream ended
    #[error("transport closed")]
    TransportClosed,

    /// Unknown or unusable transport kind requested from the factory
    #[error("invalid transport: {0}")]
    InvalidTransport(String),

    /// Inbound message exceeded the configured size cap
    #[error("message too large: {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// Invalid configuration, fatal at startup
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Inbound bytes were not a valid JSON-RPC request (code -32700)
    #[error("parse error: {0}")]
    Parse(String),

    /// Request named a method the dispatcher does not route (code -32601)
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Request params failed to decode or named an unknown tool (code -32602)
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Unclassified server-side fault (code -32603)
    #[error("internal error: {0}")]
    Internal(String),

    /// Command is not on the configured allow-list
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    /// Argument contained shell metacharacters (potential injection)
    #[error("unsafe argument rejected: {0}")]
    UnsafeArgument(String),

    /// Argument or working directory attempts to escape the workspace base
    #[error("path escape rejected: {0}")]
    PathEscape(String),

    /// Transport-level I/O fault
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller's scope was cancelled; never re-typed into another fault
    #[error("operation cancelled")]
    Cancelled,

    /// `start_monitoring` called while a monitor loop is running
    #[error("health monitoring already active")]
    MonitorAlreadyActive,

    /// `stop_monitoring` called with no monitor loop running
    #[error("health monitoring not active")]
    MonitorNotActive,
}

impl QuillError {
    /// Reserved JSON-RPC error code for protocol-fault variants.
    ///
    /// Non-protocol faults map to -32603 so a caller can always build a
    /// well-formed error payload.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            QuillError::Parse(_) => -32700,
            QuillError::MethodNotFound(_) => -32601,
            QuillError::InvalidParams(_) => -32602,
            _ => -32603,
        }
    }
}

/// Result type alias for quill-mcp operations
pub type Result<T> = std::result::Result<T, QuillError>;

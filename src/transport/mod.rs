//! Transport abstraction for quill-mcp.
//!
//! One cancellable contract over two I/O models: a stream transport pumped
//! by the serve loop and an HTTP transport that drives its handler
//! directly. Each submodule owns one implementation; the factory builds
//! the configured one.

pub mod factory;
pub mod http;
pub mod stdio;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use crate::config::TransportKind;
use crate::metrics::TransportMetrics;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Common lifecycle and message contract for both transports.
///
/// Lifecycle invariants shared by all implementations:
/// - `stop` is idempotent
/// - `start` after `stop` fails with "transport closed"; a transport is
///   never resurrected
/// - `send` and `receive` fail with "transport closed" once stopped
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bring the transport up. Fails once the transport has been stopped.
    async fn start(&self, scope: &CancellationToken) -> crate::Result<()>;

    /// Shut the transport down, bounded by the configured grace period.
    async fn stop(&self, scope: &CancellationToken) -> crate::Result<()>;

    /// Deliver one response envelope, durably flushed before returning.
    async fn send(&self, scope: &CancellationToken, response: JsonRpcResponse)
        -> crate::Result<()>;

    /// Produce the next decoded request, racing the caller's scope so a
    /// withdrawn caller never blocks on a decode it no longer wants.
    async fn receive(&self, scope: &CancellationToken) -> crate::Result<JsonRpcRequest>;

    /// Liveness as a single observation; never a compound of separately
    /// queried states.
    fn is_healthy(&self) -> bool;

    fn kind(&self) -> TransportKind;

    /// Counters shared with health reporting.
    fn metrics(&self) -> Arc<TransportMetrics>;
}

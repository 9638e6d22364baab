//! HTTP transport — axum server exposing the protocol endpoint and a
//! health endpoint.
//!
//! Unlike the stream transport, requests are delivered straight to the
//! construction-time `RequestHandler` from the route handler; `receive`
//! only parks until closure so a generic serve loop can drive either
//! transport. In-flight requests are capped by a semaphore sized from
//! config: when no permit is immediately available the request is
//! rejected with 503 instead of queueing without bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{TransportConfig, TransportKind};
use crate::error::QuillError;
use crate::metrics::TransportMetrics;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestHandler};
use crate::transport::Transport;

/// State shared with the axum route handlers.
struct HttpState {
    handler: Arc<dyn RequestHandler>,
    metrics: Arc<TransportMetrics>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
    max_message_bytes: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    log_messages: bool,
    scope: CancellationToken,
}

/// Network transport serving `POST /mcp` and `GET /health`.
pub struct HttpTransport {
    config: TransportConfig,
    handler: Arc<dyn RequestHandler>,
    metrics: Arc<TransportMetrics>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    started: AtomicBool,
    shutdown: CancellationToken,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            config,
            handler,
            metrics: Arc::new(TransportMetrics::new()),
            ready: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            server_task: Mutex::new(None),
        }
    }

    fn state(&self, scope: &CancellationToken) -> Arc<HttpState> {
        Arc::new(HttpState {
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
            ready: self.ready.clone(),
            closed: self.closed.clone(),
            permits: Arc::new(Semaphore::new(self.config.queue_capacity)),
            max_message_bytes: self.config.max_message_bytes,
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
            write_timeout: Duration::from_secs(self.config.write_timeout_secs),
            log_messages: self.config.log_messages,
            scope: scope.clone(),
        })
    }
}

fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/health", get(health_endpoint))
        .with_state(state)
}

/// Protocol endpoint. Violations of the HTTP surface (method, content
/// type, size, JSON shape) are rejected before any JSON-RPC processing.
async fn mcp_endpoint(
    State(state): State<Arc<HttpState>>,
    request: axum::extract::Request,
) -> Response {
    if state.closed.load(Ordering::Acquire) {
        return (StatusCode::SERVICE_UNAVAILABLE, "transport closed").into_response();
    }

    let (parts, body) = request.into_parts();

    let content_type_ok = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !content_type_ok {
        return (
            StatusCode::BAD_REQUEST,
            "content type must be application/json",
        )
            .into_response();
    }

    let bytes = match tokio::time::timeout(
        state.read_timeout,
        axum::body::to_bytes(body, state.max_message_bytes),
    )
    .await
    {
        Err(_elapsed) => {
            return (StatusCode::REQUEST_TIMEOUT, "request body read timed out").into_response();
        }
        Ok(Err(_)) => {
            // to_bytes fails once the cap is exceeded; no decoding happened.
            return (
                StatusCode::BAD_REQUEST,
                format!("request body exceeds {} bytes", state.max_message_bytes),
            )
                .into_response();
        }
        Ok(Ok(bytes)) => bytes,
    };

    let decoded: JsonRpcRequest = match serde_json::from_slice(&bytes) {
        Ok(req) => req,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("malformed JSON-RPC request: {}", e))
                .into_response();
        }
    };

    state.metrics.record_received();
    if state.log_messages {
        tracing::debug!(method = %decoded.method, "received request");
    }

    // Bounded hand-off: a full server answers immediately instead of
    // buffering requests.
    let permit = match state.permits.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("request rejected: in-flight capacity exhausted");
            return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
        }
    };

    let request_scope = state.scope.child_token();
    let outcome =
        tokio::time::timeout(state.write_timeout, state.handler.handle(decoded, &request_scope))
            .await;
    drop(permit);

    match outcome {
        Err(_elapsed) => {
            tracing::error!("request handler exceeded the write timeout");
            (StatusCode::INTERNAL_SERVER_ERROR, "handler timed out").into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "request handler faulted");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
        // Notification: processed, nothing to send back.
        Ok(Ok(None)) => StatusCode::ACCEPTED.into_response(),
        Ok(Ok(Some(response))) => {
            state.metrics.record_sent();
            if state.log_messages {
                tracing::debug!("sending response");
            }
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

/// Readiness plus counters; 200 only while the listener is bound and the
/// transport has not been stopped.
async fn health_endpoint(State(state): State<Arc<HttpState>>) -> Response {
    let ready = state.ready.load(Ordering::Acquire) && !state.closed.load(Ordering::Acquire);
    let body = serde_json::json!({
        "status": "ok",
        "transport": "http",
        "ready": ready,
        "messagesReceived": state.metrics.received(),
        "messagesSent": state.metrics.sent(),
        "uptime": format!("{:?}", state.metrics.uptime()),
    });
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self, scope: &CancellationToken) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::TransportClosed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(QuillError::Internal("transport already started".to_string()));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let bound = listener.local_addr()?;

        let app = build_router(self.state(scope));
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
        *self.server_task.lock().await = Some(task);

        // Readiness flips only after the bind is confirmed.
        self.ready.store(true, Ordering::Release);
        tracing::info!(addr = %bound, "HTTP transport listening");
        Ok(())
    }

    async fn stop(&self, _scope: &CancellationToken) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.ready.store(false, Ordering::Release);
        self.shutdown.cancel();

        if let Some(task) = self.server_task.lock().await.take() {
            let grace = Duration::from_secs(self.config.shutdown_grace_secs);
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => tracing::info!("HTTP transport stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task panicked"),
                Err(_elapsed) => {
                    // Never swallowed: an overrunning shutdown is reported.
                    tracing::error!(
                        grace_secs = self.config.shutdown_grace_secs,
                        "HTTP graceful shutdown exceeded grace period"
                    );
                }
            }
        }
        Ok(())
    }

    async fn send(
        &self,
        _scope: &CancellationToken,
        _response: JsonRpcResponse,
    ) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::TransportClosed);
        }
        // Responses travel on the HTTP exchange that carried the request;
        // there is no out-of-band channel to route one through.
        Err(QuillError::Internal(
            "http responses are delivered on their originating exchange".to_string(),
        ))
    }

    async fn receive(&self, scope: &CancellationToken) -> crate::Result<JsonRpcRequest> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::TransportClosed);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(QuillError::NotStarted);
        }
        // Requests flow through the handler; this only reports closure so
        // a generic serve loop can park on either transport kind.
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(QuillError::TransportClosed),
            _ = scope.cancelled() => Err(QuillError::Cancelled),
        }
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.ready.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn metrics(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }
}

//! Stream transport over a byte-oriented reader/writer pair.
//!
//! `start` spawns a detached decode task feeding a bounded channel, so
//! `receive` can race channel reads against the caller's scope: a
//! withdrawn caller abandons the decode without blocking it, and the
//! decoded value is delivered to the next caller instead of being lost.
//! End-of-stream closes the channel and maps to "transport closed", not a
//! decode error. Responses are framed as one JSON value per line with no
//! length prefix.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{TransportConfig, TransportKind};
use crate::error::QuillError;
use crate::metrics::TransportMetrics;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

/// Decoded items handed from the decode task to `receive`.
enum DecodeEvent {
    Request(JsonRpcRequest),
    /// Line was not a valid request envelope; answered with -32700.
    Malformed(String),
    /// Line exceeded the configured size cap.
    Oversized(usize),
}

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pipe-oriented stream transport.
pub struct StdioTransport {
    reader: Mutex<Option<BoxReader>>,
    writer: Mutex<BoxWriter>,
    incoming: Mutex<Option<mpsc::Receiver<DecodeEvent>>>,
    started: AtomicBool,
    closed: AtomicBool,
    decode_cancel: CancellationToken,
    metrics: Arc<TransportMetrics>,
    max_message_bytes: usize,
    log_messages: bool,
}

impl StdioTransport {
    /// Build over an arbitrary reader/writer pair (tests use an in-memory
    /// duplex pipe).
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        config: &TransportConfig,
    ) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Box::new(writer)),
            incoming: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            decode_cancel: CancellationToken::new(),
            metrics: Arc::new(TransportMetrics::new()),
            max_message_bytes: config.max_message_bytes,
            log_messages: config.log_messages,
        }
    }

    /// Build over the process's stdin/stdout.
    pub fn from_stdio(config: &TransportConfig) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), config)
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::TransportClosed);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(QuillError::NotStarted);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self, _scope: &CancellationToken) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::TransportClosed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(QuillError::Internal("transport already started".to_string()));
        }

        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(QuillError::NotStarted)?;

        let (tx, rx) = mpsc::channel(32);
        *self.incoming.lock().await = Some(rx);

        let cancel = self.decode_cancel.clone();
        let max_bytes = self.max_message_bytes;
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let event = match line {
                            Ok(Some(line)) => {
                                let trimmed = line.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                if trimmed.len() > max_bytes {
                                    DecodeEvent::Oversized(trimmed.len())
                                } else {
                                    match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                                        Ok(req) => DecodeEvent::Request(req),
                                        Err(e) => DecodeEvent::Malformed(e.to_string()),
                                    }
                                }
                            }
                            // EOF or read fault: closing the channel tells
                            // receive() the stream is gone.
                            Ok(None) => break,
                            Err(e) => {
                                tracing::debug!(error = %e, "stream read failed, closing decode loop");
                                break;
                            }
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("stdio decode loop finished");
        });

        tracing::info!("stdio transport started");
        Ok(())
    }

    async fn stop(&self, _scope: &CancellationToken) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            // Idempotent: stopping twice is a no-op.
            return Ok(());
        }
        self.decode_cancel.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.flush().await;
        tracing::info!("stdio transport stopped");
        Ok(())
    }

    async fn send(
        &self,
        scope: &CancellationToken,
        response: JsonRpcResponse,
    ) -> crate::Result<()> {
        self.ensure_open()?;
        if scope.is_cancelled() {
            return Err(QuillError::Cancelled);
        }

        let mut encoded = serde_json::to_string(&response)
            .map_err(|e| QuillError::Internal(format!("response encoding failed: {}", e)))?;
        if self.log_messages {
            tracing::debug!(message = %encoded, "sending response");
        }
        encoded.push('\n');

        // Flush before returning so the response is durably delivered.
        let mut writer = self.writer.lock().await;
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        self.metrics.record_sent();
        Ok(())
    }

    async fn receive(&self, scope: &CancellationToken) -> crate::Result<JsonRpcRequest> {
        self.ensure_open()?;

        let mut guard = self.incoming.lock().await;
        let rx = guard.as_mut().ok_or(QuillError::NotStarted)?;

        let event = tokio::select! {
            event = rx.recv() => event,
            _ = scope.cancelled() => return Err(QuillError::Cancelled),
        };

        match event {
            None => {
                // Decode loop ended: the input stream is gone for good.
                self.closed.store(true, Ordering::Release);
                Err(QuillError::TransportClosed)
            }
            Some(DecodeEvent::Request(request)) => {
                self.metrics.record_received();
                if self.log_messages {
                    tracing::debug!(method = %request.method, "received request");
                }
                Ok(request)
            }
            Some(DecodeEvent::Malformed(detail)) => Err(QuillError::Parse(detail)),
            Some(DecodeEvent::Oversized(size)) => Err(QuillError::MessageTooLarge {
                size,
                limit: self.max_message_bytes,
            }),
        }
    }

    fn is_healthy(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn metrics(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }
}

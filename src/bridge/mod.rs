//! Secure command bridge — validates a tool call and executes the wrapped
//! program in an isolated workspace.
//!
//! Two-phase contract: `validate_command` rejects unsafe invocations before
//! any process exists; `execute_command` runs the subprocess under the
//! effective timeout and always returns a populated `ExecutionResponse`.
//! Non-zero exits, launch faults, and timeouts land in the response's
//! `error` text rather than failing the call, so partial output remains
//! inspectable by the model. Only scope cancellation propagates as an
//! error.

pub mod guard;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::error::QuillError;
use guard::{contains_traversal, resolve_within_base, CommandGuard};

/// Execution request at the bridge boundary.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command: String,
    pub args: Vec<String>,
    /// Workspace override; a fresh per-run directory is used when absent.
    pub working_dir: Option<PathBuf>,
    /// Additions layered over the inherited parent environment.
    pub env: HashMap<String, String>,
    /// Requested timeout, clamped to the configured ceiling.
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Execution outcome. Exit 0 with no error text is success; anything else
/// is a domain-level failure, never a protocol fault.
#[derive(Debug, Clone)]
pub struct ExecutionResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ExecutionResponse {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Clamp a requested timeout to the configured ceiling. A caller may
/// shorten the ceiling but never lengthen it.
pub fn effective_timeout(requested: Option<Duration>, ceiling: Duration) -> Duration {
    match requested {
        Some(r) => r.min(ceiling),
        None => ceiling,
    }
}

/// Distinguishes per-run workspace directories within one process.
static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Prepared working directory; per-run directories are removed on drop.
struct Workspace {
    path: PathBuf,
    owned: bool,
}

impl Workspace {
    fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(
                    workspace = %self.path.display(),
                    error = %e,
                    "failed to remove execution workspace"
                );
            }
        }
    }
}

/// Validates and executes invocations of the wrapped program. Holds no
/// cross-request mutable state; each execution is independent.
pub struct CommandBridge {
    config: BridgeConfig,
    guard: CommandGuard,
}

impl CommandBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let guard = CommandGuard::new(config.allowed_commands.clone());
        Self { config, guard }
    }

    /// Phase one: allow-list, metacharacter, and traversal validation.
    pub fn validate_command(&self, command: &str, args: &[String]) -> crate::Result<()> {
        self.guard.check(command, args)
    }

    /// Phase two: run the validated command in its workspace, racing
    /// {output collection, effective timeout, scope cancellation}.
    pub async fn execute_command(
        &self,
        request: ExecutionRequest,
        scope: &CancellationToken,
    ) -> crate::Result<ExecutionResponse> {
        if scope.is_cancelled() {
            return Err(QuillError::Cancelled);
        }
        self.validate_command(&request.command, &request.args)?;

        let timeout = effective_timeout(
            request.timeout,
            Duration::from_secs(self.config.max_timeout_secs),
        );
        let workspace = self.prepare_workspace(request.working_dir.as_deref())?;
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&request.command);
        cmd.args(&request.args)
            .envs(&request.env)
            .current_dir(workspace.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Launch fault: reported in the response, not raised.
                return Ok(ExecutionResponse {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    error: Some(format!("failed to launch '{}': {}", request.command, e)),
                });
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let output = tokio::select! {
            result = async {
                let mut stdout_bytes = Vec::new();
                let mut stderr_bytes = Vec::new();
                let (out_read, err_read) = tokio::join!(
                    async {
                        match stdout_pipe.as_mut() {
                            Some(out) => out.read_to_end(&mut stdout_bytes).await.map(|_| ()),
                            None => Ok(()),
                        }
                    },
                    async {
                        match stderr_pipe.as_mut() {
                            Some(err) => err.read_to_end(&mut stderr_bytes).await.map(|_| ()),
                            None => Ok(()),
                        }
                    },
                );
                out_read?;
                err_read?;
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((status, stdout_bytes, stderr_bytes))
            } => match result {
                Ok(output) => output,
                Err(e) => {
                    return Ok(ExecutionResponse {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration: start.elapsed(),
                        error: Some(format!("process I/O error: {}", e)),
                    });
                }
            },
            _ = tokio::time::sleep(timeout) => {
                // Kill the process, not just the future.
                let _ = child.kill().await;
                tracing::warn!(
                    command = %request.command,
                    timeout_secs = timeout.as_secs(),
                    "command timed out"
                );
                return Ok(ExecutionResponse {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    error: Some(format!("timed out after {:?}", timeout)),
                });
            }
            _ = scope.cancelled() => {
                let _ = child.kill().await;
                return Err(QuillError::Cancelled);
            }
        };

        let (status, stdout_bytes, stderr_bytes) = output;
        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        tracing::info!(
            command = %request.command,
            args = ?request.args,
            exit_code = %exit_code,
            duration_ms = %duration.as_millis(),
            "command execution finished"
        );
        if !stderr.is_empty() {
            tracing::debug!(command = %request.command, stderr = %stderr, "command stderr");
        }

        let error = if exit_code != 0 {
            let trimmed = stderr.trim();
            Some(if trimmed.is_empty() {
                format!("exit status {}", exit_code)
            } else {
                trimmed.to_string()
            })
        } else {
            None
        };

        Ok(ExecutionResponse {
            exit_code,
            stdout,
            stderr,
            duration,
            error,
        })
    }

    /// Prepare the working directory before the subprocess starts.
    ///
    /// An override is validated against the workspace base and created if
    /// absent, then left in place. Without an override a fresh per-run
    /// directory under the base is used and removed when the execution
    /// finishes, on every exit path.
    fn prepare_workspace(&self, requested: Option<&std::path::Path>) -> crate::Result<Workspace> {
        match requested {
            Some(dir) => {
                let raw = dir.to_string_lossy();
                if contains_traversal(&raw) {
                    tracing::error!(
                        requested = %raw,
                        "working directory rejected: parent-directory traversal"
                    );
                    return Err(QuillError::PathEscape(raw.into_owned()));
                }
                let resolved = resolve_within_base(&self.config.working_dir, dir)?;
                std::fs::create_dir_all(&resolved)?;
                Ok(Workspace {
                    path: resolved,
                    owned: false,
                })
            }
            None => {
                let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
                let path = self
                    .config
                    .working_dir
                    .join(format!("job-{}-{}", std::process::id(), seq));
                std::fs::create_dir_all(&path)?;
                Ok(Workspace { path, owned: true })
            }
        }
    }
}

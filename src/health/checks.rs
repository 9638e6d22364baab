//! Built-in health probes: CLI reachability and storage writability.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::health::{CheckOutcome, HealthCheck};

/// Probe verifying the wrapped program answers a version query in time.
pub struct CliProbe {
    command: String,
    timeout: Duration,
}

impl CliProbe {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for CliProbe {
    fn name(&self) -> &str {
        "cli"
    }

    async fn run(&self) -> (CheckOutcome, String) {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_elapsed) => {
                return (
                    CheckOutcome::Unhealthy,
                    format!(
                        "'{} --version' did not respond within {:?}",
                        self.command, self.timeout
                    ),
                );
            }
            Ok(Err(e)) => {
                return (
                    CheckOutcome::Unhealthy,
                    format!("failed to invoke '{}': {}", self.command, e),
                );
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return (
                CheckOutcome::Unhealthy,
                format!(
                    "'{} --version' exited with {}",
                    self.command,
                    output.status.code().unwrap_or(-1)
                ),
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or("").trim().to_string();
        if version.is_empty() {
            (
                CheckOutcome::Warning,
                format!("'{} --version' returned no output", self.command),
            )
        } else {
            (CheckOutcome::Healthy, version)
        }
    }
}

/// Probe verifying the storage directory exists and is writable.
pub struct StorageProbe {
    dir: PathBuf,
}

impl StorageProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl HealthCheck for StorageProbe {
    fn name(&self) -> &str {
        "storage"
    }

    async fn run(&self) -> (CheckOutcome, String) {
        match tokio::fs::metadata(&self.dir).await {
            Err(_) => match tokio::fs::create_dir_all(&self.dir).await {
                Ok(()) => (
                    CheckOutcome::Warning,
                    format!(
                        "storage directory '{}' was missing and has been created",
                        self.dir.display()
                    ),
                ),
                Err(e) => (
                    CheckOutcome::Unhealthy,
                    format!(
                        "storage directory '{}' cannot be created: {}",
                        self.dir.display(),
                        e
                    ),
                ),
            },
            Ok(meta) if !meta.is_dir() => (
                CheckOutcome::Unhealthy,
                format!("storage path '{}' is not a directory", self.dir.display()),
            ),
            Ok(_) => {
                let probe_file = self.dir.join(".quill-health-probe");
                match tokio::fs::write(&probe_file, b"probe").await {
                    Ok(()) => {
                        let _ = tokio::fs::remove_file(&probe_file).await;
                        (
                            CheckOutcome::Healthy,
                            format!("storage directory '{}' is writable", self.dir.display()),
                        )
                    }
                    Err(e) => (
                        CheckOutcome::Unhealthy,
                        format!(
                            "storage directory '{}' is not writable: {}",
                            self.dir.display(),
                            e
                        ),
                    ),
                }
            }
        }
    }
}

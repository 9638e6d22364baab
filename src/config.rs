//! quill-mcp server configuration — deserialization and validation.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::QuillError;

/// Top-level quill-mcp configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// Supported transport kinds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// Transport settings, immutable once a transport is built.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Explicit transport kind. When absent, detection applies
    /// (flag > MCP_TRANSPORT env var > stdio).
    pub kind: Option<TransportKind>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Inbound message size cap in bytes. Oversized requests are rejected
    /// before any JSON decoding.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Debug-log every message sent and received.
    #[serde(default)]
    pub log_messages: bool,
    /// Concurrent in-flight request cap for the HTTP transport. Requests
    /// past the cap are rejected immediately rather than queued.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Grace period for HTTP shutdown before giving up and logging.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: None,
            host: default_host(),
            port: default_port(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            max_message_bytes: default_max_message_bytes(),
            log_messages: false,
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Secure command bridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// The wrapped external program (e.g. "quill").
    #[serde(default = "default_command")]
    pub command: String,
    /// Commands accepted by validation, matched exactly or by base name.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Base directory under which every execution workspace must live.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Ceiling for per-execution timeouts. Callers may shorten, never
    /// lengthen.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            allowed_commands: default_allowed_commands(),
            working_dir: default_working_dir(),
            max_timeout_secs: default_max_timeout_secs(),
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Data directory whose writability the storage probe verifies.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Timeout for the CLI reachability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Repeating check interval for `start_monitoring`.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            probe_timeout_secs: default_probe_timeout_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

/// One catalog entry mapping an MCP tool to a subcommand of the wrapped
/// program.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Subcommand path prepended to caller-supplied arguments
    /// (e.g. `["invoice", "create"]`).
    #[serde(default)]
    pub args: Vec<String>,
    /// JSON schema override; a generic args-array schema applies otherwise.
    pub input_schema: Option<serde_json::Value>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_message_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    32
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_command() -> String {
    "quill".to_string()
}

fn default_allowed_commands() -> Vec<String> {
    vec![default_command()]
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("quill-mcp")
}

fn default_max_timeout_secs() -> u64 {
    60
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".quill")
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_interval_secs() -> u64 {
    30
}

impl QuillConfig {
    /// Parse a TOML document into a config.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| QuillError::InvalidConfig(e.to_string()))
    }

    /// Validate the config, failing fast on misconfigurations before any
    /// transport or subprocess exists.
    pub fn validate(&self) -> crate::Result<()> {
        if self.transport.kind == Some(TransportKind::Http) && self.transport.host.is_empty() {
            return Err(QuillError::InvalidConfig(
                "HTTP transport requires a non-empty 'host'".to_string(),
            ));
        }
        if self.transport.kind == Some(TransportKind::Http) && self.transport.port == 0 {
            return Err(QuillError::InvalidConfig(
                "HTTP transport requires a non-zero 'port'".to_string(),
            ));
        }
        if self.transport.max_message_bytes == 0 {
            return Err(QuillError::InvalidConfig(
                "'max_message_bytes' must be greater than zero".to_string(),
            ));
        }
        if self.transport.queue_capacity == 0 {
            return Err(QuillError::InvalidConfig(
                "'queue_capacity' must be greater than zero".to_string(),
            ));
        }

        if self.bridge.command.is_empty() {
            return Err(QuillError::InvalidConfig(
                "bridge requires a non-empty 'command'".to_string(),
            ));
        }
        if self.bridge.allowed_commands.is_empty() {
            return Err(QuillError::InvalidConfig(
                "'allowed_commands' must list at least one command".to_string(),
            ));
        }
        if self.bridge.max_timeout_secs == 0 {
            return Err(QuillError::InvalidConfig(
                "'max_timeout_secs' must be greater than zero".to_string(),
            ));
        }

        if self.health.interval_secs == 0 {
            return Err(QuillError::InvalidConfig(
                "'interval_secs' must be greater than zero".to_string(),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for tool in &self.tools {
            if tool.name.is_empty() {
                return Err(QuillError::InvalidConfig(
                    "tool entries require a non-empty 'name'".to_string(),
                ));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(QuillError::InvalidConfig(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }

        Ok(())
    }
}

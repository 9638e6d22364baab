//! quill-mcp — serve the quill CLI to MCP clients.
//!
//! Transport selection: `--stdio`/`--http` flag, then the MCP_TRANSPORT
//! environment variable (case-folded), then stdio.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use quill_mcp::{detect_transport, McpServer, QuillConfig, TransportKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// quill-mcp — MCP server for the quill invoicing CLI.
#[derive(Parser)]
#[command(
    name = "quill-mcp",
    version,
    about = "Serve the quill invoicing CLI to MCP clients via STDIO or HTTP"
)]
struct Cli {
    /// Path to config file [default: ./quill-mcp.toml or ~/.config/quill-mcp/quill-mcp.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve over stdin/stdout (for Claude Desktop and other STDIO clients)
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Serve over HTTP
    #[arg(long)]
    http: bool,

    /// Bind address override for the HTTP transport
    #[arg(long)]
    host: Option<String>,

    /// Port override for the HTTP transport
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the stdio transport owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    // Ctrl-C cancels the root scope for graceful shutdown.
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down quill-mcp");
        cancel_for_signal.cancel();
    });

    let mut config = load_config(cli.config.as_deref()).await?;

    if let Some(host) = cli.host {
        config.transport.host = host;
    }
    if let Some(port) = cli.port {
        config.transport.port = port;
    }
    if config.transport.kind.is_none() {
        let args: Vec<String> = if cli.stdio {
            vec!["--stdio".to_string()]
        } else if cli.http {
            vec!["--http".to_string()]
        } else {
            vec![]
        };
        let env: HashMap<String, String> = std::env::vars().collect();
        config.transport.kind = Some(detect_transport(&args, &env));
    }

    let kind = config.transport.kind.unwrap_or(TransportKind::Stdio);
    tracing::info!(transport = %kind, command = %config.bridge.command, "starting quill-mcp");

    let server = McpServer::from_config(config)
        .map_err(|e| anyhow::anyhow!("failed to build server: {}", e))?;
    server
        .run(cancel)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    Ok(())
}

/// Resolve and parse the config file. A missing default file is not an
/// error; defaults apply.
async fn load_config(explicit: Option<&Path>) -> Result<QuillConfig> {
    let path = match resolve_config_path(explicit) {
        Some(path) => path,
        None => {
            tracing::info!("no config file found, using defaults");
            return Ok(QuillConfig::default());
        }
    };

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {}", path, e))?;
    let config = QuillConfig::from_toml_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {:?}: {}", path, e))?;
    tracing::info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Config path precedence: explicit flag, then ./quill-mcp.toml, then the
/// XDG config directory.
fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = Path::new("quill-mcp.toml");
    if local.exists() {
        return Some(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("quill-mcp").join("quill-mcp.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    None
}

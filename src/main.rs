//! Redix gate MCP server - stdio entry point.
//!
//! Configuration layers, lowest to highest: defaults, `--config` file,
//! environment, CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use redix_gate::mcp::McpServer;
use redix_gate::observability::init_tracing;
use redix_gate::types::CallerAttestation;
use redix_gate::{Config, Dispatcher};

#[derive(Debug, Parser)]
#[command(name = "redix-gate", version, about = "Gate-enforced healthcare conversion tools over MCP stdio")]
struct Cli {
    /// JSON config file.
    #[arg(long, env = "REDIX_CONFIG")]
    config: Option<PathBuf>,

    /// Conversion engine base URL.
    #[arg(long)]
    api_base: Option<String>,

    /// Engine API key.
    #[arg(long)]
    api_key: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Let callers skip Gate 1 with `pre_validated: true`.
    #[arg(long)]
    allow_prevalidated: bool,

    /// Emit JSON logs on stderr.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_config(&self) -> redix_gate::Result<Config> {
        let base = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        let mut config = base.with_env()?;

        if let Some(url) = &self.api_base {
            config.backend.base_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.backend.api_key = key.clone();
        }
        if let Some(secs) = self.timeout {
            config.backend.timeout = Duration::from_secs(secs);
        }
        if self.allow_prevalidated {
            config.gates.caller_attestation = CallerAttestation::Allow;
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_tracing(&config.observability);

    let dispatcher = Dispatcher::from_config(&config)?;
    tracing::info!(
        "redix_gate_starting: base_url={}, attestation={:?}, timeout={:?}",
        config.backend.base_url,
        config.gates.caller_attestation,
        config.backend.timeout
    );

    McpServer::new(dispatcher, config.transport.clone())
        .serve_stdio()
        .await?;

    tracing::info!("redix_gate_stopped");
    Ok(())
}

//! LLM Audit operator tool
//!
//! Usage:
//!   llm-audit [--config llm-audit.yaml] audit --request request.json
//!   cat request.json | llm-audit audit --request -
//!   llm-audit query "Summarize: patient reports knee pain" --model llama3.1:8b
//!   llm-audit health
//!
//! Without `--config` the configuration comes from `LLM_*` environment
//! variables (and `.env`).

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use llm_audit_service::{AuditCoordinator, LlmAuditConfig, LlmAuditRequest};
use logger_redacted::{init_logging, LoggerConfig};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "llm-audit")]
#[command(about = "Audit clinical transcripts and query LLM providers with caching and fallback")]
struct Args {
    /// Configuration file (YAML, TOML or JSON); defaults to environment variables
    #[arg(long, env = "LLM_AUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an audit request and print the response JSON
    Audit {
        /// Request JSON file, or `-` for stdin
        #[arg(long)]
        request: String,
    },
    /// Send a single query through the provider chain
    Query {
        message: String,

        /// Model hint applied to every provider
        #[arg(long)]
        model: Option<String>,
    },
    /// Print metrics, health and cache statistics
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(
        &LoggerConfig::from_env()
            .with_level(args.log_level.clone())
            .with_json(args.json_logs),
    )?;

    let config = match &args.config {
        Some(path) => LlmAuditConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => LlmAuditConfig::from_env().context("loading config from environment")?,
    };
    let coordinator = AuditCoordinator::new(config)?;

    match args.command {
        Command::Audit { request } => {
            let request = read_request(&request)?;
            info!(task = %request.task, "Running audit");
            let response = coordinator.audit(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(2);
            }
        }
        Command::Query { message, model } => {
            let response = coordinator.orchestrator().query(&message, model.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Health => {
            let report = json!({
                "health": coordinator.health(),
                "metrics": coordinator.metrics(),
                "cache": coordinator.cache_stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn read_request(source: &str) -> anyhow::Result<LlmAuditRequest> {
    let raw = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading request from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading request file {source}"))?
    };

    serde_json::from_str(&raw).context("parsing audit request JSON")
}

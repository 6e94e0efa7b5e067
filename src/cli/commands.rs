//! CLI command definitions for labforge.
//!
//! `serve` runs the HTTP API; `check` probes the compiler and, when
//! credentials are given, the generation endpoint; `history` inspects and
//! prunes finished reports without starting the server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::api;
use crate::compile::{DocumentCompiler, LatexCompiler};
use crate::history::{HistoryStore, DEFAULT_LIST_LIMIT};
use crate::llm::{Credentials, GenerationRequest, LlmProvider, Message, OpenAiCompatClient};
use crate::pipeline::{PipelineConfig, PipelineDeps, Scheduler};

/// Timeout for the endpoint probe of `check`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lab report generator: data sheets in, compiled reports out.
#[derive(Parser)]
#[command(name = "labforge")]
#[command(about = "Generate compiled lab reports from experiment data sheets")]
#[command(version)]
#[command(
    long_about = "labforge turns uploaded data sheets and experiment guides into typeset reports.\n\nIt extracts the measured tables, asks a chat-completions endpoint for the report content, renders the requested plots in a sandboxed Python process and compiles the result with XeLaTeX.\n\nExample usage:\n  labforge serve --bind 0.0.0.0:5000\n  labforge check --api-url https://api.openai.com/v1 --api-key $KEY --api-model gpt-4o-mini"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file, applied before LABFORGE_* variables.
    #[arg(short, long, global = true, env = "LABFORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),

    /// Check that the compiler and the generation endpoint are usable.
    Check(CheckArgs),

    /// Inspect or prune report history.
    History(HistoryArgs),
}

/// Arguments for `labforge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind, overriding the configuration.
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Data directory for sessions, outputs and history.
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}

/// Arguments for `labforge check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Chat-completions base URL to probe.
    #[arg(long, env = "LABFORGE_API_URL")]
    pub api_url: Option<String>,

    /// API key for the endpoint.
    #[arg(long, env = "LABFORGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name to probe.
    #[arg(long, env = "LABFORGE_API_MODEL")]
    pub api_model: Option<String>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `labforge history`.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistorySubcommand,
}

/// History subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum HistorySubcommand {
    /// List the newest reports whose document still exists.
    List {
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(short = 'j', long)]
        json: bool,
    },
    /// Show one record as JSON.
    Show { id: String },
    /// Search by experiment or student name.
    Search { query: String },
    /// Delete a record and its files.
    Delete { id: String },
    /// Show history statistics.
    Stats,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())
        .with_context(|| "failed to load configuration")?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Check(args) => run_check_command(config, args).await,
        Commands::History(args) => run_history_command(config, args).await,
    }
}

async fn run_serve_command(mut config: PipelineConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    config.validate()?;

    tokio::fs::create_dir_all(config.outputs_dir())
        .await
        .with_context(|| format!("cannot create {}", config.outputs_dir().display()))?;
    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        compiler = %config.compiler_path,
        "Starting labforge"
    );

    let deps = PipelineDeps::from_config(&config).await?;
    let scheduler = Scheduler::new(config, deps);
    api::serve(scheduler, api::ctrl_c()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckReport {
    compiler_ok: bool,
    compiler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
}

async fn run_check_command(config: PipelineConfig, args: CheckArgs) -> anyhow::Result<()> {
    let compiler = LatexCompiler::new(
        &config.compiler_path,
        config.compiler_passes,
        config.compile_timeout,
    );
    let (compiler_ok, compiler_message) = match compiler.version().await {
        Ok(version) => (true, version),
        Err(e) => (false, e.to_string()),
    };

    let mut report = CheckReport {
        compiler_ok,
        compiler: compiler_message,
        endpoint_ok: None,
        endpoint: None,
    };

    if let (Some(url), Some(key), Some(model)) = (args.api_url, args.api_key, args.api_model) {
        let credentials = Credentials::new(url, key, model);
        let (ok, message) = probe_endpoint(&credentials).await;
        report.endpoint_ok = Some(ok);
        report.endpoint = Some(message);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} compiler: {}",
            if report.compiler_ok { "✓" } else { "✗" },
            report.compiler
        );
        match (report.endpoint_ok, &report.endpoint) {
            (Some(ok), Some(message)) => {
                println!("{} endpoint: {}", if ok { "✓" } else { "✗" }, message)
            }
            _ => println!("- endpoint: skipped (no credentials given)"),
        }
    }

    if !report.compiler_ok || report.endpoint_ok == Some(false) {
        anyhow::bail!("environment check failed");
    }
    Ok(())
}

async fn probe_endpoint(credentials: &Credentials) -> (bool, String) {
    let client = match OpenAiCompatClient::new(credentials, PROBE_TIMEOUT) {
        Ok(client) => client,
        Err(e) => return (false, e.to_string()),
    };
    let request = GenerationRequest::new(
        credentials.model.clone(),
        vec![Message::user("Reply with the single word: ok")],
    )
    .with_max_tokens(8);

    match client.generate(request).await {
        Ok(_) => (true, format!("{} responded", client.endpoint())),
        Err(e) => (false, e.to_string()),
    }
}

async fn run_history_command(config: PipelineConfig, args: HistoryArgs) -> anyhow::Result<()> {
    let history = HistoryStore::open(config.history_path(), config.history_capacity).await?;

    match args.command {
        HistorySubcommand::List { limit, json } => {
            let records = history.list(limit).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No reports found.");
            } else {
                for record in records {
                    println!(
                        "{}  {}  {}  {}",
                        record.id,
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        record.experiment_name,
                        record.student_name
                    );
                }
            }
        }
        HistorySubcommand::Show { id } => {
            let record = history.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        HistorySubcommand::Search { query } => {
            let records = history.search(&query).await;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        HistorySubcommand::Delete { id } => {
            history.delete(&id).await?;
            println!("✓ Deleted {}", id);
        }
        HistorySubcommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&history.stats().await)?);
        }
    }
    Ok(())
}

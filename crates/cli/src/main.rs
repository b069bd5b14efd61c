use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verity_core::{config::AppConfig, VerityClientBuilder};

mod commands;
use commands::{handle_config_command, list_nodes, run_batch, run_call, CallArgs, ConfigCommands};

#[derive(Parser)]
#[command(name = "verity-cli")]
#[command(about = "Verity CLI - query blockchains through untrusted nodes and verify every answer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(long, env = "VERITY_CONFIG", default_value = "config/verity.toml", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one verified call
    Call {
        /// Chain name or id
        chain: String,

        /// RPC method, e.g. eth_getBalance
        method: String,

        /// Positional params as a JSON array
        params: Option<String>,

        #[command(flatten)]
        args: CallArgs,
    },

    /// Run a JSON file of calls concurrently
    Batch {
        /// JSON array of {chain, method, params, finality, retries, timeout_ms}
        file: String,
    },

    /// List a chain's nodes and their reputation
    Nodes {
        /// Chain name or id
        chain: String,

        /// Refresh from the chain's on-chain registry first
        #[arg(long)]
        refresh: bool,
    },

    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Initializes logging from the configured format.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,verity_core={level},verity_cli={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.metrics.enabled {
        return None;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to install metrics recorder");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config(command) => return handle_config_command(command),
        other => other,
    };

    let config = commands::utils::load_config(&cli.config)?;
    init_logging(&config);
    let metrics = init_metrics(&config);

    let client = VerityClientBuilder::new()
        .with_config(config)
        .build()
        .context("failed to initialize client")?;

    let outcome = match &command {
        Commands::Call { chain, method, params, args } => {
            run_call(&client, chain, method, params.as_deref(), args).await
        }
        Commands::Batch { file } => run_batch(&client, file).await,
        Commands::Nodes { chain, refresh } => list_nodes(&client, chain, *refresh).await,
        Commands::Config(_) => Ok(()),
    };

    match client.save_snapshot() {
        Ok(true) => debug!("snapshot saved"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "failed to save snapshot"),
    }
    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }
    outcome
}

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::Path;
use verity_core::config::AppConfig;

use super::utils::{load_config, print_info, print_success};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/verity.toml")]
        file: String,
    },

    /// Show the effective configuration, including environment overrides
    Show {
        #[arg(short, long, default_value = "config/verity.toml")]
        file: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/verity.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn validate_config(file: &str) -> Result<()> {
    if !Path::new(file).exists() {
        bail!("configuration file not found: {file}");
    }

    print_info(&format!("Validating configuration from {file}..."));
    let config = load_config(file)?;
    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    for chain in &config.chains {
        println!(
            "  {} ({}): {} family, {} seed nodes, {}",
            chain.name,
            chain.id,
            chain.family,
            chain.nodes.len(),
            match (&chain.checkpoint, chain.required_signatures) {
                (Some(cp), _) => format!("checkpoint at block {}", cp.number),
                (None, n) if n > 0 => format!("{n} required signatures"),
                (None, _) => "committee trust".to_string(),
            }
        );
    }
    println!(
        "  Dispatch: redundancy {}, {} retries, {}ms per call",
        config.dispatch.redundancy, config.dispatch.max_retries, config.dispatch.call_timeout_ms
    );
    println!("  Cache: {}", if config.cache.enabled { "enabled" } else { "disabled" });
    println!(
        "  Persistence: {}",
        config.persistence.path.as_ref().map_or("disabled".to_string(), |p| p.display().to_string())
    );
    Ok(())
}

fn show_config(file: &str) -> Result<()> {
    let config = AppConfig::from_file(file).with_context(|| format!("failed to load {file}"))?;
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Verity light client configuration

[dispatch]
redundancy = 2
max_retries = 3
attempt_timeout_ms = 5000
call_timeout_ms = 20000

[registry]
selection = "weighted"
transport_failure_threshold = 3
verification_blacklist_seconds = 86400

[cache]
enabled = true
max_entries = 10000
moving_tag_ttl_seconds = 12

[finality]
account = 0
utxo = 6

[persistence]
path = "data/verity-snapshot.json"

[logging]
level = "info"
format = "pretty"

[[chains]]
id = 1
name = "mainnet"
family = "account"
# Replace with a block hash you trust
checkpoint = { number = 19000000, hash = "0x0000000000000000000000000000000000000000000000000000000000000001" }

[[chains.nodes]]
url = "https://node-1.example.com/rpc"

[[chains.nodes]]
url = "https://node-2.example.com/rpc"
"#;

fn generate_config(output: &str, force: bool) -> Result<()> {
    if Path::new(output).exists() && !force {
        bail!("file {output} already exists, use --force to overwrite");
    }
    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Replace the checkpoint with a block hash obtained out of band before use");
    Ok(())
}

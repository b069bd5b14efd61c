//! Client configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations of every section
//! 2. **Config file**: TOML file named by the `VERITY_CONFIG` env var
//!    (default `config/verity.toml`)
//! 3. **Environment variables**: `VERITY__SECTION__FIELD` overrides, e.g.
//!    `VERITY__DISPATCH__MAX_RETRIES=5`
//!
//! # Configuration Sections
//!
//! - [`DispatchConfig`]: redundancy, retry and timeout budgets
//! - [`RegistryConfig`]: selection strategy and penalty policy
//! - [`CacheConfig`]: response cache sizing and TTLs
//! - [`TrustConfig`]: trust-anchor horizon and header segment limits
//! - [`FinalityDefaults`]: default confirmations per chain family
//! - [`ChainConfig`]: per-chain seeds, checkpoint and proof settings
//! - [`HttpTransportConfig`]: HTTP client limits
//! - [`PersistenceConfig`], [`LoggingConfig`], [`MetricsConfig`]
//!
//! # Example
//!
//! ```toml
//! [dispatch]
//! redundancy = 2
//! max_retries = 3
//!
//! [[chains]]
//! id = 1
//! name = "mainnet"
//! family = "account"
//! checkpoint = { number = 19000000, hash = "0x..." }
//!
//! [[chains.nodes]]
//! url = "https://node-1.example.com/rpc"
//! weight = 2
//! ```

use crate::{
    cache::CacheConfig,
    dispatch::DispatchConfig,
    proof::TrustConfig,
    registry::{NodeProps, RegistryConfig},
    request::FinalityDefaults,
    transport::HttpTransportConfig,
    types::{Address, ChainDescriptor, ChainFamily, ChainId, RegistryContract},
};
use config::{Config, ConfigError, Environment, File};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::{Path, PathBuf}};

/// A bootstrap node endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedNode {
    /// JSON-RPC endpoint; also the node's identity.
    pub url: String,

    /// Address the node signs block-hash attestations with.
    #[serde(default)]
    pub signer: Option<Address>,

    /// Relative selection weight. Defaults to `1`.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Registered deposit in the chain's smallest unit.
    #[serde(default)]
    pub deposit: U256,

    /// Capability flags. Defaults to a proof-serving HTTP node.
    #[serde(default = "NodeProps::standard")]
    pub props: NodeProps,
}

fn default_weight() -> u32 {
    1
}

/// Trust-anchor bootstrap checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub number: u64,
    pub hash: H256,
}

/// Signing committee for checkpoint-attested chains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitteeConfig {
    pub members: Vec<Address>,
    pub threshold: usize,
}

/// Per-chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub family: ChainFamily,

    /// On-chain node registry, for chains that publish one.
    #[serde(default)]
    pub registry: Option<RegistryContract>,

    /// Bootstrap nodes used until a registry refresh succeeds.
    #[serde(default)]
    pub nodes: Vec<SeedNode>,

    /// Initial trust anchor.
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,

    /// Distinct registered signers needed to accept an unanchored proving block
    /// (account and UTXO chains) or to attest content (content-addressed chains).
    #[serde(default)]
    pub required_signatures: usize,

    /// Overrides the family default finality for this chain.
    #[serde(default)]
    pub finality: Option<u64>,

    /// Easiest acceptable compact difficulty target (UTXO chains).
    #[serde(default = "default_pow_limit_bits")]
    pub pow_limit_bits: u32,

    /// Signing committee (checkpoint chains).
    #[serde(default)]
    pub committee: Option<CommitteeConfig>,

    /// Name of a registered proof system (checkpoint chains using zk proofs).
    #[serde(default)]
    pub zk_verifier: Option<String>,
}

fn default_pow_limit_bits() -> u32 {
    0x1d00_ffff
}

impl ChainConfig {
    /// Creates a chain entry with no seeds or checkpoint.
    #[must_use]
    pub fn new(id: ChainId, name: impl Into<String>, family: ChainFamily) -> Self {
        Self {
            id,
            name: name.into(),
            family,
            registry: None,
            nodes: Vec::new(),
            checkpoint: None,
            required_signatures: 0,
            finality: None,
            pow_limit_bits: default_pow_limit_bits(),
            committee: None,
            zk_verifier: None,
        }
    }

    /// Returns the immutable descriptor for this chain.
    #[must_use]
    pub fn descriptor(&self) -> ChainDescriptor {
        ChainDescriptor {
            id: self.id,
            name: self.name.clone(),
            family: self.family,
            registry: self.registry.clone(),
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Snapshot file; persistence is disabled when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging settings, consumed by the binary when it installs the subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled() }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub finality: FinalityDefaults,
    #[serde(default)]
    pub transport: HttpTransportConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment values still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .set_default("metrics.enabled", default_metrics_enabled())?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("VERITY").separator("__").try_parsing(true))
            .build()?;

        config.try_deserialize()
    }

    /// Loads configuration from `VERITY_CONFIG` or `config/verity.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("VERITY_CONFIG").unwrap_or_else(|_| "config/verity.toml".to_string());
        Self::from_file(config_path)
    }

    /// Looks up a configured chain by id.
    #[must_use]
    pub fn chain(&self, id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == id)
    }

    /// Looks up a configured chain by name or decimal id.
    #[must_use]
    pub fn chain_by_name(&self, name: &str) -> Option<&ChainConfig> {
        self.chains
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .or_else(|| name.parse::<ChainId>().ok().and_then(|id| self.chain(id)))
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.chains.is_empty() {
            return Err("No chains configured".to_string());
        }

        self.dispatch.validate()?;
        self.cache.validate()?;
        self.trust.validate()?;

        let mut ids = HashSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.id) {
                return Err(format!("Duplicate chain id {}", chain.id));
            }
            if chain.name.is_empty() {
                return Err(format!("Chain {} has an empty name", chain.id));
            }
            for node in &chain.nodes {
                let parsed = url::Url::parse(&node.url)
                    .map_err(|e| format!("Invalid node URL for chain {}: {} ({e})", chain.name, node.url))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!(
                        "Unsupported node URL scheme for chain {}: {}",
                        chain.name, node.url
                    ));
                }
            }
            if let Some(checkpoint) = chain.checkpoint {
                if checkpoint.hash.is_zero() {
                    return Err(format!("Checkpoint hash for chain {} is zero", chain.name));
                }
            }
            match chain.family {
                ChainFamily::Checkpoint => {
                    let Some(committee) = &chain.committee else {
                        return Err(format!("Checkpoint chain {} needs a committee", chain.name));
                    };
                    if committee.threshold == 0 || committee.threshold > committee.members.len() {
                        return Err(format!(
                            "Committee threshold for chain {} must be within 1..={}",
                            chain.name,
                            committee.members.len()
                        ));
                    }
                }
                ChainFamily::Account | ChainFamily::Utxo => {
                    if chain.checkpoint.is_none() && chain.required_signatures == 0 {
                        return Err(format!(
                            "Chain {} needs a checkpoint or required_signatures > 0",
                            chain.name
                        ));
                    }
                }
                ChainFamily::ContentAddressed => {}
            }
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}

//! Caller API: one handle that owns the registry, trust anchors, verifier,
//! cache and dispatcher for every configured chain.

use serde_json::Value;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cache::ResponseCache,
    config::AppConfig,
    dispatch::{BatchCall, CallError, DispatchConfig, DispatchError, Dispatcher},
    persistence::{Snapshot, SnapshotError},
    proof::{ExecutionVerifier, ProofSystem, ProofVerifier, SignerDirectory, TrustAnchorStore},
    registry::{NodeRecord, NodeRegistry, RefreshSummary, RegistryError},
    request::RequestBuilder,
    transport::{HttpTransport, Transport, TransportError},
    types::{CallOptions, ChainDescriptor, ChainId, VerifiedResult},
};

/// Errors raised while assembling a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("no configuration provided")]
    MissingConfig,

    #[error("transport initialization failed: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to load snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

struct RegisteredProofSystem {
    name: String,
    verifier_key: Vec<u8>,
    system: Arc<dyn ProofSystem>,
}

/// Builder for [`VerityClient`].
///
/// ```no_run
/// # use verity_core::{client::VerityClientBuilder, config::AppConfig};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = VerityClientBuilder::new().with_config(AppConfig::load()?).build()?;
/// let balance = client
///     .call("mainnet", "eth_getBalance", vec!["0x00000000219ab540356cbb839cbe05303d7705fa".into(), "latest".into()], &Default::default())
///     .await?;
/// println!("{}", balance.value());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct VerityClientBuilder {
    config: Option<AppConfig>,
    transport: Option<Arc<dyn Transport>>,
    execution: Option<Arc<dyn ExecutionVerifier>>,
    proof_systems: Vec<RegisteredProofSystem>,
    load_snapshot: bool,
}

impl VerityClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { load_snapshot: true, ..Self::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the HTTP transport, e.g. with an in-process fake.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enables `eth_call` and `eth_estimateGas`.
    #[must_use]
    pub fn with_execution_verifier(mut self, execution: Arc<dyn ExecutionVerifier>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Registers a proof system that checkpoint chains can name in `zk_verifier`.
    #[must_use]
    pub fn with_proof_system(
        mut self,
        name: impl Into<String>,
        verifier_key: Vec<u8>,
        system: Arc<dyn ProofSystem>,
    ) -> Self {
        self.proof_systems.push(RegisteredProofSystem { name: name.into(), verifier_key, system });
        self
    }

    /// Ignores `persistence.path` when starting, so seeds and checkpoints apply.
    #[must_use]
    pub fn skip_snapshot(mut self) -> Self {
        self.load_snapshot = false;
        self
    }

    /// Builds the client. A persisted snapshot, when configured and present,
    /// is restored before checkpoints are seeded, so its anchors win.
    ///
    /// # Errors
    /// Returns [`ClientError`] for invalid configuration, an HTTP client that
    /// cannot be created, or an unreadable snapshot.
    pub fn build(self) -> Result<VerityClient, ClientError> {
        let config = self.config.ok_or(ClientError::MissingConfig)?;
        config.validate().map_err(ClientError::ConfigValidation)?;

        info!(
            chains = config.chains.len(),
            redundancy = config.dispatch.redundancy,
            cache_enabled = config.cache.enabled,
            "initializing verity client"
        );

        let registry = Arc::new(NodeRegistry::new(config.registry.clone()));
        let mut chains = HashMap::new();
        for chain in &config.chains {
            let seeds = chain.nodes.iter().map(|seed| NodeRecord::from_seed(chain.id, seed)).collect();
            registry.register_chain(chain.descriptor(), seeds);
            chains.insert(chain.id, Arc::new(chain.descriptor()));
        }

        let anchors = Arc::new(TrustAnchorStore::new());
        let snapshot_path = config.persistence.path.clone();
        if let Some(path) = snapshot_path.as_deref().filter(|_| self.load_snapshot) {
            match Snapshot::load(path)? {
                Some(snapshot) => {
                    snapshot.apply(&registry, &anchors);
                }
                None => debug!(path = %path.display(), "no snapshot found, starting from seeds"),
            }
        }

        let signers: Arc<dyn SignerDirectory> = registry.clone();
        let mut verifier = ProofVerifier::new(config.trust.clone(), Arc::clone(&anchors), signers);
        if let Some(execution) = self.execution {
            verifier = verifier.with_execution_verifier(execution);
        }
        for proof_system in self.proof_systems {
            verifier.register_proof_system(proof_system.name, proof_system.verifier_key, proof_system.system);
        }
        let verifier = Arc::new(verifier);

        let builder = Arc::new(RequestBuilder::new(
            config.finality.clone(),
            Arc::clone(&verifier),
            Arc::clone(&registry),
        ));
        for chain in &config.chains {
            verifier.configure_chain(chain);
            builder.configure_chain(chain);
        }

        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.transport.clone())?),
        };

        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatch.clone(),
            Arc::clone(&registry),
            builder,
            verifier,
            Arc::clone(&cache),
            transport,
        ));

        Ok(VerityClient { config, chains, registry, anchors, cache, dispatcher, snapshot_path })
    }
}

/// Verifying RPC client for every configured chain.
pub struct VerityClient {
    config: AppConfig,
    chains: HashMap<ChainId, Arc<ChainDescriptor>>,
    registry: Arc<NodeRegistry>,
    anchors: Arc<TrustAnchorStore>,
    cache: Arc<ResponseCache>,
    dispatcher: Arc<Dispatcher>,
    snapshot_path: Option<PathBuf>,
}

impl VerityClient {
    /// Resolves a chain by configured name or decimal id.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChain`] when nothing matches.
    pub fn chain(&self, name_or_id: &str) -> Result<Arc<ChainDescriptor>, RegistryError> {
        self.config
            .chain_by_name(name_or_id)
            .and_then(|chain| self.chains.get(&chain.id))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChain(name_or_id.parse().unwrap_or_default()))
    }

    /// Runs one verified call.
    ///
    /// # Errors
    /// Returns [`CallError`] when the chain is unknown or the call fails.
    pub async fn call(
        &self,
        chain: &str,
        method: &str,
        params: Vec<Value>,
        options: &CallOptions,
    ) -> Result<VerifiedResult, CallError> {
        let chain = self.chain(chain).map_err(DispatchError::from)?;
        self.dispatcher.call(chain, method, params, options).await
    }

    /// Runs calls concurrently; each result stands alone and keeps its position.
    pub async fn call_batch(&self, calls: Vec<BatchCall>) -> Vec<Result<VerifiedResult, CallError>> {
        self.dispatcher.call_batch(calls).await
    }

    /// Builds a batch entry for a chain by name.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChain`] when the chain is not configured.
    pub fn batch_call(
        &self,
        chain: &str,
        method: impl Into<String>,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<BatchCall, RegistryError> {
        Ok(BatchCall { chain: self.chain(chain)?, method: method.into(), params, options })
    }

    /// Replaces a chain's nodes with the verified list from its on-chain registry.
    ///
    /// # Errors
    /// Returns [`RegistryError`] if the chain has no registry or the list cannot
    /// be fetched and verified; the current nodes stay in place.
    pub async fn refresh_registry(&self, chain: &str) -> Result<RefreshSummary, RegistryError> {
        let chain = self.chain(chain)?;
        let outcome = self.registry.refresh(&chain, self.dispatcher.as_ref()).await;
        if let Err(e) = &outcome {
            warn!(chain = chain.id, error = %e, "registry refresh failed");
        }
        outcome
    }

    /// Current records of a chain's nodes, sorted by node id.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChain`] when the chain is not configured.
    pub fn nodes(&self, chain: &str) -> Result<Vec<NodeRecord>, RegistryError> {
        let chain = self.chain(chain)?;
        Ok(self.registry.nodes(chain.id))
    }

    /// Writes the registry and anchors to `persistence.path`. Returns `false`
    /// when persistence is not configured.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] if the snapshot cannot be written.
    pub fn save_snapshot(&self) -> Result<bool, SnapshotError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        Snapshot::capture(&self.registry, &self.anchors).save(path)?;
        Ok(true)
    }

    pub fn update_dispatch_config(&self, config: DispatchConfig) {
        self.dispatcher.update_config(config);
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn anchors(&self) -> &Arc<TrustAnchorStore> {
        &self.anchors
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ChainConfig, CheckpointConfig, PersistenceConfig},
        types::ChainFamily,
    };
    use primitive_types::H256;

    fn config() -> AppConfig {
        let mut chain = ChainConfig::new(1, "mainnet", ChainFamily::Account);
        chain.checkpoint = Some(CheckpointConfig { number: 100, hash: H256::repeat_byte(1) });
        AppConfig { chains: vec![chain], ..Default::default() }
    }

    #[test]
    fn test_build_requires_valid_config() {
        assert!(matches!(VerityClientBuilder::new().build(), Err(ClientError::MissingConfig)));
        assert!(matches!(
            VerityClientBuilder::new().with_config(AppConfig::default()).build(),
            Err(ClientError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_chain_lookup_by_name_and_id() {
        let client = VerityClientBuilder::new().with_config(config()).build().unwrap();
        assert_eq!(client.chain("mainnet").unwrap().id, 1);
        assert_eq!(client.chain("MAINNET").unwrap().id, 1);
        assert_eq!(client.chain("1").unwrap().name, "mainnet");
        assert!(matches!(client.chain("goerli"), Err(RegistryError::UnknownChain(_))));
        assert_eq!(client.anchors().tip(1).map(|a| a.number), Some(100));
    }

    #[test]
    fn test_snapshot_anchors_take_precedence_over_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut config = config();
        config.persistence = PersistenceConfig { path: Some(path.clone()) };

        let client = VerityClientBuilder::new().with_config(config.clone()).build().unwrap();
        client.anchors().restore(vec![crate::proof::TrustAnchor::checkpoint(1, 250, H256::repeat_byte(2))]);
        assert!(client.save_snapshot().unwrap());

        let restarted = VerityClientBuilder::new().with_config(config.clone()).build().unwrap();
        assert_eq!(restarted.anchors().tip(1).map(|a| a.number), Some(250));

        let fresh = VerityClientBuilder::new().with_config(config).skip_snapshot().build().unwrap();
        assert_eq!(fresh.anchors().tip(1).map(|a| a.number), Some(100));
    }
}

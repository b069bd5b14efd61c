//! Shared setup for client-level tests.

use std::sync::Arc;
use verity_core::{
    config::{AppConfig, ChainConfig, SeedNode},
    registry::{NodeProps, SelectionStrategy},
    types::ChainFamily,
    VerityClient, VerityClientBuilder,
};

use super::{mock_chain::MockChain, scripted_transport::ScriptedTransport};

pub const CHAIN_ID: u64 = 1;
pub const CHAIN_NAME: &str = "testnet";

/// Endpoint URL for a named mock node.
pub fn node_url(name: &str) -> String {
    format!("http://{name}.node.test")
}

/// An account chain checkpointed at `chain`'s first block, seeded with `nodes`.
pub fn account_chain(chain: &MockChain, nodes: &[&str]) -> ChainConfig {
    let mut config = ChainConfig::new(CHAIN_ID, CHAIN_NAME, ChainFamily::Account);
    config.checkpoint = Some(chain.checkpoint());
    config.nodes = nodes
        .iter()
        .map(|name| SeedNode {
            url: node_url(name),
            signer: None,
            weight: 1,
            deposit: Default::default(),
            props: NodeProps::standard(),
        })
        .collect();
    config
}

/// Reproducible client configuration: deterministic selection, no metrics
/// recorder, no persistence.
pub fn test_config(chain: ChainConfig) -> AppConfig {
    let mut config = AppConfig { chains: vec![chain], ..AppConfig::default() };
    config.registry.selection = SelectionStrategy::Deterministic;
    config.metrics.enabled = false;
    config
}

pub fn build_client(config: AppConfig, transport: Arc<ScriptedTransport>) -> VerityClient {
    VerityClientBuilder::new()
        .with_config(config)
        .with_transport(transport)
        .skip_snapshot()
        .build()
        .expect("test client builds")
}

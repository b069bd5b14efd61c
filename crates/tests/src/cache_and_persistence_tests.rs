//! Integration tests for the response cache and client snapshots.
//!
//! These tests verify that:
//! - A cached result is returned unchanged, however often it is read
//! - Snapshots carry trust anchors and node reputation across restarts
//! - Environment overrides apply on top of the config file

use primitive_types::U256;
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;
use verity_core::{config::AppConfig, types::NodeId, utils::encode_hex, CallOptions};

use crate::mock_infrastructure::{
    account_chain, build_client, node_url, test_config, Address, MockChain, ScriptedTransport, CHAIN_ID,
    CHAIN_NAME,
};

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

fn params(block: &str) -> Vec<Value> {
    vec![json!(encode_hex(alice().as_bytes())), json!(block)]
}

fn funded_chain() -> Arc<MockChain> {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(14);
    Arc::new(chain)
}

fn honest_transport(chain: &Arc<MockChain>) -> Arc<ScriptedTransport> {
    let honest = Arc::clone(chain);
    Arc::new(ScriptedTransport::new().on(&node_url("a"), move |req, _| honest.balance_answer(req, 14).into()))
}

#[tokio::test]
async fn test_cached_result_is_stable_across_reads() {
    let chain = funded_chain();
    let transport = honest_transport(&chain);
    let client = build_client(test_config(account_chain(&chain, &["a"])), Arc::clone(&transport));
    let options = CallOptions::default().finality(0);

    let first = client.call(CHAIN_NAME, "eth_getBalance", params("0xc"), &options).await.unwrap();
    let second = client.call(CHAIN_NAME, "eth_getBalance", params("0xc"), &options).await.unwrap();
    let third = client.call(CHAIN_NAME, "eth_getBalance", params("0xc"), &options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(transport.total_requests(), 1);
    assert_eq!(client.cache().len(), 1);

    // a different finality is a different call
    client.call(CHAIN_NAME, "eth_getBalance", params("0xc"), &options.finality(1)).await.unwrap();
    assert_eq!(transport.total_requests(), 2);

    client.clear_cache();
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_snapshot_restores_anchors_and_reputation() {
    let dir = tempfile::tempdir().unwrap();
    let chain = funded_chain();
    let mut config = test_config(account_chain(&chain, &["a"]));
    config.persistence.path = Some(dir.path().join("state").join("snapshot.json"));

    let client = build_client(config.clone(), honest_transport(&chain));
    client.call(CHAIN_NAME, "eth_getBalance", params("latest"), &CallOptions::default().finality(0)).await.unwrap();
    assert!(client.save_snapshot().unwrap());

    let restored = verity_core::VerityClientBuilder::new()
        .with_config(config)
        .with_transport(honest_transport(&chain))
        .build()
        .unwrap();

    let tip = restored.anchors().tip(CHAIN_ID).unwrap();
    assert_eq!(tip.number, 14);
    assert_eq!(tip.hash, chain.hash(14));

    let node = restored.registry().node(CHAIN_ID, &NodeId::new(node_url("a"))).unwrap();
    assert_eq!(node.last_seen_block, 14);
    assert_eq!(node.total_requests, 1);
}

#[test]
#[serial]
fn test_env_overrides_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verity.toml");
    std::fs::write(
        &path,
        r#"
[dispatch]
redundancy = 2
max_retries = 1

[[chains]]
id = 1
name = "testnet"
family = "account"

[[chains.nodes]]
url = "http://a.node.test"
"#,
    )
    .unwrap();

    std::env::set_var("VERITY__DISPATCH__MAX_RETRIES", "7");
    let config = AppConfig::from_file(&path);
    std::env::remove_var("VERITY__DISPATCH__MAX_RETRIES");
    let config = config.unwrap();

    assert_eq!(config.dispatch.redundancy, 2);
    assert_eq!(config.dispatch.max_retries, 7);
    assert_eq!(config.chains.len(), 1);
    assert_eq!(config.chains[0].nodes[0].url, "http://a.node.test");
    assert!(config.validate().is_ok());
}

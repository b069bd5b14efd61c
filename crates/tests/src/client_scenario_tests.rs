//! End-to-end client scenarios against scripted nodes serving a mock chain.
//!
//! These tests verify that:
//! - An honest node's proven answer is returned with its provenance
//! - A node serving a forged proof is blacklisted and replaced
//! - Concurrent answers at different heights resolve to the highest block
//! - Too few confirmations wait for the chain instead of penalizing the node
//! - A call whose nodes never answer ends in a timeout that counts against them

use primitive_types::U256;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use verity_core::{
    dispatch::AttemptOutcome,
    types::NodeId,
    utils::encode_hex,
    CallOptions, DispatchError,
};

use crate::mock_infrastructure::{
    account_chain, build_client, node_url, test_config, Address, MockChain, Reply, ScriptedTransport,
    CHAIN_ID, CHAIN_NAME,
};

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

fn balance_params(block: &str) -> Vec<Value> {
    vec![json!(encode_hex(alice().as_bytes())), json!(block)]
}

fn latest() -> CallOptions {
    CallOptions::default().finality(0)
}

#[tokio::test]
async fn test_single_honest_node_balance_is_verified() {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(14);
    let chain = Arc::new(chain);

    let honest = Arc::clone(&chain);
    let transport = Arc::new(
        ScriptedTransport::new().on(&node_url("a"), move |req, _| honest.balance_answer(req, 14).into()),
    );
    let client = build_client(test_config(account_chain(&chain, &["a"])), Arc::clone(&transport));

    let result = client.call(CHAIN_NAME, "eth_getBalance", balance_params("latest"), &latest()).await.unwrap();

    assert_eq!(result.value(), &json!("0x3e8"));
    assert_eq!(result.proving_block_number(), 14);
    assert_eq!(result.proving_block_hash(), chain.hash(14));
    assert_eq!(result.chain_id(), CHAIN_ID);
    assert_eq!(result.node().as_str(), node_url("a"));
    assert_eq!(transport.total_requests(), 1);

    // the checkpoint was offered as a link target and the segment became trusted
    let sent = transport.sent();
    let meta = sent[0].in3.as_ref().unwrap();
    assert_eq!(meta.verification, "proof");
    assert!(meta.verified_hashes.iter().any(|h| h.hash == chain.hash(10)));
    assert_eq!(client.anchors().tip(CHAIN_ID).unwrap().number, 14);

    let node = client.registry().node(CHAIN_ID, &NodeId::new(node_url("a"))).unwrap();
    assert_eq!(node.failure_count, 0);
    assert_eq!(node.last_seen_block, 14);
}

#[tokio::test]
async fn test_forged_proof_blacklists_node_and_falls_back() {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(14);
    let chain = Arc::new(chain);

    let liar = Arc::clone(&chain);
    let honest = Arc::clone(&chain);
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(&node_url("a"), move |req, _| {
                liar.forged_balance_answer(req, 14, U256::from(1_000_000u64)).into()
            })
            .on(&node_url("b"), move |req, _| honest.balance_answer(req, 14).into()),
    );
    let client = build_client(test_config(account_chain(&chain, &["a", "b"])), Arc::clone(&transport));

    let result = client.call(CHAIN_NAME, "eth_getBalance", balance_params("latest"), &latest()).await.unwrap();
    assert_eq!(result.value(), &json!("0x3e8"));
    assert_eq!(result.node().as_str(), node_url("b"));

    let liar = client.registry().node(CHAIN_ID, &NodeId::new(node_url("a"))).unwrap();
    assert!(liar.is_blacklisted());
    assert!(liar.failure_count > 0);
    assert_eq!(liar.verification_strikes, 1);

    // a blacklisted node is never asked again
    client.clear_cache();
    client.call(CHAIN_NAME, "eth_getBalance", balance_params("latest"), &latest()).await.unwrap();
    assert_eq!(transport.requests_to(&node_url("a")), 1);
    assert_eq!(transport.requests_to(&node_url("b")), 2);
}

#[tokio::test]
async fn test_higher_proving_block_wins_without_conflict() {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(14);
    chain.mine(&[(alice(), U256::from(2_000u64))]);
    chain.mine_to(16);
    let chain = Arc::new(chain);

    let behind = Arc::clone(&chain);
    let ahead = Arc::clone(&chain);
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(&node_url("a"), move |req, _| behind.balance_answer(req, 14).into())
            .on(&node_url("b"), move |req, _| ahead.balance_answer(req, 16).into()),
    );
    let mut config = test_config(account_chain(&chain, &["a", "b"]));
    config.dispatch.redundancy = 2;
    let client = build_client(config, Arc::clone(&transport));

    let result = client.call(CHAIN_NAME, "eth_getBalance", balance_params("latest"), &latest()).await.unwrap();

    assert_eq!(result.proving_block_number(), 16);
    assert_eq!(result.value(), &json!("0x7d0"));
    assert_eq!(result.node().as_str(), node_url("b"));
    assert_eq!(transport.total_requests(), 2);
    for name in ["a", "b"] {
        let node = client.registry().node(CHAIN_ID, &NodeId::new(node_url(name))).unwrap();
        assert_eq!(node.failure_count, 0, "node {name} must not be penalized");
    }
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_finality_waits_for_confirmations() {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(18);
    let chain = Arc::new(chain);

    // the node's head is 14 on the first request and 18 afterwards
    let node = Arc::clone(&chain);
    let transport = Arc::new(ScriptedTransport::new().on(&node_url("a"), move |req, seen| {
        let head = if seen == 0 { 14 } else { 18 };
        node.balance_answer(req, head).into()
    }));
    let config = test_config(account_chain(&chain, &["a"]));
    let delay = Duration::from_millis(config.dispatch.finality_retry_delay_ms);
    let client = build_client(config, Arc::clone(&transport));

    let started = Instant::now();
    let result = client
        .call(CHAIN_NAME, "eth_getBalance", balance_params("0xc"), &CallOptions::default().finality(6))
        .await
        .unwrap();

    assert!(started.elapsed() >= delay);
    assert_eq!(result.proving_block_number(), 12);
    assert_eq!(result.proving_block_hash(), chain.hash(12));
    assert_eq!(result.value(), &json!("0x3e8"));
    assert_eq!(transport.requests_to(&node_url("a")), 2);

    let record = client.registry().node(CHAIN_ID, &NodeId::new(node_url("a"))).unwrap();
    assert_eq!(record.failure_count, 0);
    assert!(!record.is_blacklisted());
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_nodes_time_out_and_are_penalized() {
    let chain = MockChain::new(10);
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(&node_url("a"), |_, _| Reply::Hang)
            .on(&node_url("b"), |_, _| Reply::Hang)
            .on(&node_url("c"), |_, _| Reply::Hang),
    );
    let mut config = test_config(account_chain(&chain, &["a", "b", "c"]));
    config.dispatch.redundancy = 3;
    let client = build_client(config, Arc::clone(&transport));

    let started = Instant::now();
    let err = client
        .call(
            CHAIN_NAME,
            "eth_getBalance",
            balance_params("latest"),
            &latest().timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind, DispatchError::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(err.trail.len(), 3);
    assert!(err.trail.iter().all(|attempt| matches!(attempt.outcome, AttemptOutcome::TimedOut)));
    for name in ["a", "b", "c"] {
        let node = client.registry().node(CHAIN_ID, &NodeId::new(node_url(name))).unwrap();
        assert_eq!(node.failure_count, 1, "node {name} should carry one timeout");
    }
}

#[tokio::test]
async fn test_heavier_fork_evicts_cached_results_above_divergence() {
    let mut first = MockChain::new(10);
    first.mine(&[(alice(), U256::from(1_000u64))]);
    first.mine_to(14);
    let mut heavier = first.fork(11);
    heavier.mine(&[(alice(), U256::from(2_000u64))]);
    heavier.mine_to(16);
    let (first, heavier) = (Arc::new(first), Arc::new(heavier));

    // the node follows the first branch once, then switches to the heavier one
    let (old, new) = (Arc::clone(&first), Arc::clone(&heavier));
    let transport = Arc::new(ScriptedTransport::new().on(&node_url("a"), move |req, seen| {
        if seen == 0 {
            old.balance_answer(req, 14).into()
        } else {
            new.balance_answer(req, 16).into()
        }
    }));
    let client = build_client(test_config(account_chain(&first, &["a"])), Arc::clone(&transport));

    let cached = client.call(CHAIN_NAME, "eth_getBalance", balance_params("0xc"), &latest()).await.unwrap();
    assert_eq!(cached.proving_block_hash(), first.hash(12));
    client.call(CHAIN_NAME, "eth_getBalance", balance_params("0xc"), &latest()).await.unwrap();
    assert_eq!(transport.total_requests(), 1);

    let tip = client.call(CHAIN_NAME, "eth_getBalance", balance_params("latest"), &latest()).await.unwrap();
    assert_eq!(tip.proving_block_number(), 16);
    assert_eq!(client.anchors().tip(CHAIN_ID).unwrap().hash, heavier.hash(16));
    assert_eq!(transport.total_requests(), 2);

    // block 12 was replaced, so the cached answer is gone and the call goes out again
    let refreshed = client.call(CHAIN_NAME, "eth_getBalance", balance_params("0xc"), &latest()).await.unwrap();
    assert_eq!(transport.total_requests(), 3);
    assert_eq!(refreshed.proving_block_hash(), heavier.hash(12));
    assert_eq!(refreshed.value(), &json!("0x7d0"));

    let node = client.registry().node(CHAIN_ID, &NodeId::new(node_url("a"))).unwrap();
    assert_eq!(node.failure_count, 0);
}

#[tokio::test]
async fn test_unknown_chain_is_rejected() {
    let chain = MockChain::new(10);
    let transport = Arc::new(ScriptedTransport::new());
    let client = build_client(test_config(account_chain(&chain, &["a"])), Arc::clone(&transport));

    let err = client.call("nope", "eth_getBalance", balance_params("latest"), &latest()).await.unwrap_err();
    assert!(matches!(err.kind, DispatchError::UnknownChain(_)));
    assert_eq!(transport.total_requests(), 0);
}

#[tokio::test]
async fn test_batch_results_keep_their_positions() {
    let mut chain = MockChain::new(10);
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(14);
    let chain = Arc::new(chain);

    let honest = Arc::clone(&chain);
    let transport = Arc::new(
        ScriptedTransport::new().on(&node_url("a"), move |req, _| honest.balance_answer(req, 14).into()),
    );
    let client = build_client(test_config(account_chain(&chain, &["a"])), transport);

    let calls = vec![
        client.batch_call(CHAIN_NAME, "eth_getBalance", balance_params("0xb"), latest()).unwrap(),
        client.batch_call(CHAIN_NAME, "eth_mining", vec![], latest()).unwrap(),
        client.batch_call(CHAIN_NAME, "eth_getBalance", balance_params("0xe"), latest()).unwrap(),
    ];
    let results = client.call_batch(calls).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().proving_block_number(), 11);
    assert!(matches!(results[1].as_ref().unwrap_err().kind, DispatchError::UnsupportedMethod { .. }));
    assert_eq!(results[2].as_ref().unwrap().proving_block_number(), 14);
}

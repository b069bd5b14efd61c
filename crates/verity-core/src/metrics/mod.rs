//! Metrics recorded through the `metrics` facade.
//!
//! The library never installs a recorder; when the embedding application does
//! not install one, every call here is a no-op.
//!
//! Method labels are mapped onto a fixed set of `'static` names so that caller
//! supplied method strings cannot blow up label cardinality.

use metrics::{counter, gauge, histogram};
use std::{borrow::Cow, time::Duration};

use crate::types::ChainId;

const KNOWN_METHODS: &[&str] = &[
    "eth_getBalance",
    "eth_getTransactionCount",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getTransactionReceipt",
    "eth_getTransactionByHash",
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "in3_nodeList",
    "getrawtransaction",
    "getblockheader",
    "getblockcount",
    "ipfs_get",
];

#[inline]
fn method_label(method: &str) -> Cow<'static, str> {
    KNOWN_METHODS
        .iter()
        .find(|known| **known == method)
        .map_or(Cow::Borrowed("other"), |known| Cow::Borrowed(*known))
}

/// Records the terminal outcome of a logical call.
pub fn record_call(chain: ChainId, method: &str, outcome: &'static str, elapsed: Duration) {
    let method = method_label(method);
    counter!("verity_calls_total", "chain" => chain.to_string(), "method" => method.clone(), "outcome" => outcome)
        .increment(1);
    histogram!("verity_call_duration_seconds", "chain" => chain.to_string(), "method" => method)
        .record(elapsed.as_secs_f64());
}

/// Records one node attempt.
pub fn record_attempt(chain: ChainId, outcome: &'static str) {
    counter!("verity_attempts_total", "chain" => chain.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("verity_cache_hits_total").increment(1);
    } else {
        counter!("verity_cache_misses_total").increment(1);
    }
}

pub fn record_cache_size(entries: usize) {
    gauge!("verity_cache_entries").set(entries as f64);
}

pub fn record_cache_invalidation(removed: usize) {
    counter!("verity_cache_invalidated_total").increment(removed as u64);
}

pub fn record_verification_failure(chain: ChainId, kind: &'static str) {
    counter!("verity_verification_failures_total", "chain" => chain.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_anchor_advance(chain: ChainId, tip: u64) {
    counter!("verity_anchor_advances_total", "chain" => chain.to_string()).increment(1);
    gauge!("verity_anchor_tip", "chain" => chain.to_string()).set(tip as f64);
}

pub fn record_reorg(chain: ChainId, depth: u64) {
    counter!("verity_reorgs_total", "chain" => chain.to_string()).increment(1);
    histogram!("verity_reorg_depth", "chain" => chain.to_string()).record(depth as f64);
}

pub fn record_blacklisting(chain: ChainId, reason: &'static str) {
    counter!("verity_blacklistings_total", "chain" => chain.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_eviction(chain: ChainId) {
    counter!("verity_node_evictions_total", "chain" => chain.to_string()).increment(1);
}

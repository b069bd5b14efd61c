//! Response cache for verified results.
//!
//! Entries are keyed by a [`Fingerprint`] of the logical call and only ever
//! hold [`VerifiedResult`]s, so a cache hit carries the same proof provenance
//! as a fresh verification.
//!
//! ```text
//!   dispatch ──get──▶ ResponseCache ◀──put── dispatch (after verify)
//!                        │
//!                        ├── TTL: moving tags short, fixed blocks max_age,
//!                        │        `pending` never stored
//!                        └── invalidate_reorg(chain, from) ◀── ProofVerifier reorg notice
//! ```

mod fingerprint;

pub use fingerprint::Fingerprint;

use ahash::RandomState;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    metrics,
    request::block_ref,
    types::{ChainId, RpcRequest, VerifiedResult},
    utils::{BlockRef, BlockTag},
};

/// Response cache sizing and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Absolute lifetime of any entry
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    /// Lifetime of results for `latest`-style block tags
    #[serde(default = "default_moving_tag_ttl_seconds")]
    pub moving_tag_ttl_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_age_seconds() -> u64 {
    3600
}

fn default_moving_tag_ttl_seconds() -> u64 {
    12
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_entries: default_max_entries(),
            max_age_seconds: default_max_age_seconds(),
            moving_tag_ttl_seconds: default_moving_tag_ttl_seconds(),
        }
    }
}

impl CacheConfig {
    /// # Errors
    ///
    /// Returns an error string if a bound is zero or the moving-tag TTL
    /// exceeds the maximum age.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("cache.max_entries must be greater than 0".to_string());
        }
        if self.max_age_seconds == 0 {
            return Err("cache.max_age_seconds must be greater than 0".to_string());
        }
        if self.moving_tag_ttl_seconds > self.max_age_seconds {
            return Err("cache.moving_tag_ttl_seconds must not exceed max_age_seconds".to_string());
        }
        Ok(())
    }
}

/// How long a verified result may be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Never stored.
    NoStore,
    /// Stored for at most this long, bounded by `max_age`, unless a reorg
    /// invalidates it first.
    Expires(Duration),
}

impl TtlPolicy {
    /// Policy for a request under `config`.
    #[must_use]
    pub fn for_request(request: &RpcRequest, config: &CacheConfig) -> Self {
        match block_ref(request) {
            Ok(Some(BlockRef::Tag(BlockTag::Pending))) | Err(_) => Self::NoStore,
            Ok(Some(reference)) if reference.is_moving() => {
                Self::Expires(Duration::from_secs(config.moving_tag_ttl_seconds))
            }
            Ok(_) => Self::Expires(Duration::from_secs(config.max_age_seconds)),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: VerifiedResult,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Concurrent map from call fingerprint to verified result.
///
/// Keys are independent; no operation locks more than one shard at a time
/// except the capacity sweep.
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CacheEntry, RandomState>,
    config: ArcSwap<CacheConfig>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self { entries: DashMap::with_hasher(RandomState::new()), config: ArcSwap::from_pointee(config) }
    }

    pub fn update_config(&self, config: CacheConfig) {
        if !config.enabled {
            self.clear();
        }
        self.config.store(Arc::new(config));
    }

    #[must_use]
    pub fn config(&self) -> Arc<CacheConfig> {
        self.config.load_full()
    }

    /// Returns the cached result for `fingerprint` if it has not expired.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<VerifiedResult> {
        if !self.config.load().enabled {
            return None;
        }
        let now = Instant::now();
        let lookup = self
            .entries
            .get(fingerprint)
            .map(|entry| (entry.expires_at > now).then(|| entry.result.clone()));
        let hit = match lookup {
            Some(Some(result)) => Some(result),
            Some(None) => {
                self.entries.remove_if(fingerprint, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        };
        metrics::record_cache_lookup(hit.is_some());
        trace!(fingerprint = %fingerprint, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Stores `result` under `fingerprint` according to `ttl`.
    pub fn put(&self, fingerprint: Fingerprint, result: VerifiedResult, ttl: TtlPolicy) {
        let config = self.config.load();
        let TtlPolicy::Expires(ttl) = ttl else {
            return;
        };
        if !config.enabled || ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let ttl = ttl.min(Duration::from_secs(config.max_age_seconds));
        self.entries.insert(fingerprint, CacheEntry { result, inserted_at: now, expires_at: now + ttl });

        if self.entries.len() > config.max_entries {
            self.shrink_to(config.max_entries);
        }
        metrics::record_cache_size(self.entries.len());
    }

    /// Drops expired entries, then the oldest ones, until at most `capacity` remain.
    fn shrink_to(&self, capacity: usize) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let excess = self.entries.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, Fingerprint)> =
            self.entries.iter().map(|e| (e.inserted_at, *e.key())).collect();
        by_age.sort_unstable();
        for (_, fingerprint) in by_age.into_iter().take(excess) {
            self.entries.remove(&fingerprint);
        }
        debug!(evicted = excess, capacity = capacity, "response cache over capacity");
    }

    /// Removes every entry whose result matches `predicate`. Returns the count removed.
    pub fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&VerifiedResult) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !predicate(&entry.result));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            metrics::record_cache_invalidation(removed);
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    /// Removes results of `chain_id` proven at or above `from_block`.
    pub fn invalidate_reorg(&self, chain_id: ChainId, from_block: u64) -> usize {
        let removed = self.invalidate(|result| {
            result.chain_id() == chain_id && result.proving_block_number() >= from_block
        });
        debug!(chain = chain_id, from_block = from_block, removed = removed, "cache invalidated after reorg");
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_cache_size(0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

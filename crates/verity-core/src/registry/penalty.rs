//! Reputation policy: how request outcomes change a node's record.
//!
//! # Example Configuration
//!
//! ```toml
//! [registry]
//! selection = "weighted"
//! transport_failure_threshold = 3
//! transport_blacklist_seconds = 300
//! verification_blacklist_seconds = 86400
//! verification_penalty = 10
//! decay_after_successes = 5
//! max_verification_strikes = 3
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{node::NodeRecord, selection::SelectionStrategy};

/// Registry configuration: selection strategy plus penalty policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Candidate ordering strategy (default: weighted).
    #[serde(default)]
    pub selection: SelectionStrategy,

    /// Seed for the weighted sampler; random when unset.
    #[serde(default)]
    pub selection_seed: Option<u64>,

    /// Consecutive transport failures or timeouts that trigger a blacklist (default: 3).
    #[serde(default = "default_transport_failure_threshold")]
    pub transport_failure_threshold: u32,

    /// Blacklist duration after repeated transport failures (default: 300).
    #[serde(default = "default_transport_blacklist_seconds")]
    pub transport_blacklist_seconds: u64,

    /// Blacklist duration after a failed verification (default: 86400).
    #[serde(default = "default_verification_blacklist_seconds")]
    pub verification_blacklist_seconds: u64,

    /// Amount added to `failure_count` on a failed verification (default: 10).
    #[serde(default = "default_verification_penalty")]
    pub verification_penalty: u32,

    /// Consecutive successes after which `failure_count` is halved (default: 5).
    #[serde(default = "default_decay_after_successes")]
    pub decay_after_successes: u32,

    /// Dishonesty strikes after which a node is evicted once its blacklist ends (default: 3).
    #[serde(default = "default_max_verification_strikes")]
    pub max_verification_strikes: u32,

    /// Block lag at which the freshness factor bottoms out (default: 10).
    #[serde(default = "default_max_block_lag")]
    pub max_block_lag: u64,
}

fn default_transport_failure_threshold() -> u32 {
    3
}

fn default_transport_blacklist_seconds() -> u64 {
    300
}

fn default_verification_blacklist_seconds() -> u64 {
    86_400
}

fn default_verification_penalty() -> u32 {
    10
}

fn default_decay_after_successes() -> u32 {
    5
}

fn default_max_verification_strikes() -> u32 {
    3
}

fn default_max_block_lag() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            selection: SelectionStrategy::default(),
            selection_seed: None,
            transport_failure_threshold: default_transport_failure_threshold(),
            transport_blacklist_seconds: default_transport_blacklist_seconds(),
            verification_blacklist_seconds: default_verification_blacklist_seconds(),
            verification_penalty: default_verification_penalty(),
            decay_after_successes: default_decay_after_successes(),
            max_verification_strikes: default_max_verification_strikes(),
            max_block_lag: default_max_block_lag(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn transport_blacklist(&self) -> Duration {
        Duration::from_secs(self.transport_blacklist_seconds)
    }

    #[must_use]
    pub fn verification_blacklist(&self) -> Duration {
        Duration::from_secs(self.verification_blacklist_seconds)
    }
}

/// Outcome of one request to one node, as reported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The response verified; `block` is the proving block when known.
    Success { block: Option<u64> },
    /// The response failed verification. `dishonest` marks hash or signature mismatches.
    VerificationFailed { dishonest: bool },
    TransportError,
    Timeout,
}

impl NodeOutcome {
    /// Returns a static string representation for logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::VerificationFailed { dishonest: true } => "mismatch",
            Self::VerificationFailed { dishonest: false } => "verification_failed",
            Self::TransportError => "transport_error",
            Self::Timeout => "timeout",
        }
    }
}

/// What a reported outcome did to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyEffect {
    None,
    Blacklisted { until: DateTime<Utc> },
}

/// State of a node's blacklist at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistState {
    Clear,
    Active,
    /// The blacklist just ended; the node may be selected again.
    Released,
    /// The blacklist ended and the node exhausted its strikes.
    Evict,
}

fn add(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration).map_or(DateTime::<Utc>::MAX_UTC, |d| {
        now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

/// Applies `outcome` to `record` under `config`.
///
/// A blacklist is only ever extended, never shortened, by a later penalty.
pub fn apply_outcome(
    record: &mut NodeRecord,
    outcome: NodeOutcome,
    config: &RegistryConfig,
    now: DateTime<Utc>,
) -> PenaltyEffect {
    record.total_requests = record.total_requests.saturating_add(1);

    let blacklist_for = match outcome {
        NodeOutcome::Success { block } => {
            if let Some(block) = block {
                record.last_seen_block = record.last_seen_block.max(block);
            }
            record.consecutive_failures = 0;
            record.successes_since_decay = record.successes_since_decay.saturating_add(1);
            if config.decay_after_successes > 0 &&
                record.successes_since_decay >= config.decay_after_successes
            {
                record.failure_count /= 2;
                record.successes_since_decay = 0;
            }
            None
        }
        NodeOutcome::VerificationFailed { dishonest } => {
            record.failure_count = record.failure_count.saturating_add(config.verification_penalty);
            record.successes_since_decay = 0;
            if dishonest {
                record.verification_strikes = record.verification_strikes.saturating_add(1);
            }
            Some(config.verification_blacklist())
        }
        NodeOutcome::TransportError | NodeOutcome::Timeout => {
            record.failure_count = record.failure_count.saturating_add(1);
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.successes_since_decay = 0;
            (record.consecutive_failures >= config.transport_failure_threshold).then(|| {
                record.consecutive_failures = 0;
                config.transport_blacklist()
            })
        }
    };

    match blacklist_for {
        Some(duration) => {
            let until = add(now, duration);
            let until = record.blacklisted_until.map_or(until, |current| current.max(until));
            record.blacklisted_until = Some(until);
            PenaltyEffect::Blacklisted { until }
        }
        None => PenaltyEffect::None,
    }
}

/// Blacklists `record` until at least `now + duration`.
pub fn blacklist(record: &mut NodeRecord, duration: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let until = add(now, duration);
    let until = record.blacklisted_until.map_or(until, |current| current.max(until));
    record.blacklisted_until = Some(until);
    until
}

/// Checks and clears an expired blacklist.
pub fn expire(record: &mut NodeRecord, config: &RegistryConfig, now: DateTime<Utc>) -> BlacklistState {
    match record.blacklisted_until {
        None => BlacklistState::Clear,
        Some(until) if now < until => BlacklistState::Active,
        Some(_) => {
            if config.max_verification_strikes > 0 &&
                record.verification_strikes >= config.max_verification_strikes
            {
                BlacklistState::Evict
            } else {
                record.blacklisted_until = None;
                BlacklistState::Released
            }
        }
    }
}

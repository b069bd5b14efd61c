//! Dispatch orchestrator: drives one logical call from cache lookup to a
//! verified result or a terminal error.
//!
//! ```text
//!   call(chain, method, params)
//!     │  RequestBuilder::prepare ── UnsupportedMethod / InvalidParams ──▶ Failed
//!     │  ResponseCache::get ───────────────────────── hit ──────────────▶ Succeeded
//!     ▼
//!   ┌─ round ─────────────────────────────────────────────────────────┐
//!   │ NodeRegistry::select_candidates(redundancy, exclude tried)      │
//!   │ RequestBuilder::build ─▶ Transport::send × N  (FuturesUnordered) │
//!   │ verify each response on arrival, report outcome to the registry │
//!   │ first verified opens the settle window, then the rest is dropped │
//!   └──────────────────────────────────────────────────────────────────┘
//!     │ winner ─▶ ResponseCache::put ─▶ Succeeded
//!     │ InsufficientFinality ─▶ sleep, clear exclusions, new round
//!     │ other failures ─▶ new round while the retry budget lasts
//!     ▼
//!   Failed(RetriesExhausted | RegistryExhausted | Timeout | ConflictingProofs)
//! ```
//!
//! The whole machine runs under the call timeout; dropping it cancels every
//! outstanding transport future, so late responses are never verified. Attempts
//! cut off by the deadline are reported to the registry as timeouts.

mod race;
pub mod state;

pub use state::{AttemptOutcome, AttemptRecord, CallMachine, CallState};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cache::{Fingerprint, ResponseCache, TtlPolicy},
    metrics,
    proof::{ProofVerifier, Verification},
    registry::{CandidateFilter, NodeList, NodeListSource, NodeOutcome, NodeRegistry, RegistryError},
    request::{BuildError, RequestBuilder},
    transport::Transport,
    types::{CallOptions, ChainDescriptor, ChainId, RpcRequest, VerifiedResult},
};

/// Redundancy, retry and timeout budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Candidates queried concurrently per round
    #[serde(default = "default_redundancy")]
    pub redundancy: usize,
    /// Replacement rounds after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Bound on the whole call, retries included
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_finality_retry_delay_ms")]
    pub finality_retry_delay_ms: u64,
    #[serde(default = "default_max_finality_waits")]
    pub max_finality_waits: u32,
    /// How long to keep collecting after the first verified response
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
    /// Calls of a batch in flight at once
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_redundancy() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

fn default_call_timeout_ms() -> u64 {
    20_000
}

fn default_finality_retry_delay_ms() -> u64 {
    2000
}

fn default_max_finality_waits() -> u32 {
    10
}

fn default_settle_window_ms() -> u64 {
    20
}

fn default_batch_concurrency() -> usize {
    8
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            redundancy: default_redundancy(),
            max_retries: default_max_retries(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            finality_retry_delay_ms: default_finality_retry_delay_ms(),
            max_finality_waits: default_max_finality_waits(),
            settle_window_ms: default_settle_window_ms(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl DispatchConfig {
    /// # Errors
    ///
    /// Returns an error string if a budget is zero or the call timeout is
    /// shorter than a single attempt.
    pub fn validate(&self) -> Result<(), String> {
        if self.redundancy == 0 {
            return Err("dispatch.redundancy must be greater than 0".to_string());
        }
        if self.attempt_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err("dispatch timeouts must be greater than 0".to_string());
        }
        if self.call_timeout_ms < self.attempt_timeout_ms {
            return Err("dispatch.call_timeout_ms must be at least attempt_timeout_ms".to_string());
        }
        if self.batch_concurrency == 0 {
            return Err("dispatch.batch_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Terminal failure of a logical call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("no proof strategy for {method} on {chain}")]
    UnsupportedMethod { chain: String, method: String },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unknown chain {0}")]
    UnknownChain(ChainId),

    /// Two results verified at the same proving block but disagree.
    #[error(
        "conflicting proofs at block {}: {} and {} disagree",
        first.proving_block_number(),
        first.node(),
        second.node()
    )]
    ConflictingProofs { first: Box<VerifiedResult>, second: Box<VerifiedResult> },

    #[error("call timed out")]
    Timeout,

    #[error("no viable candidate nodes remain")]
    RegistryExhausted,

    #[error("retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    #[error("finality not reached: have {have} confirmations, need {need}")]
    FinalityNotReached { have: u64, need: u64 },

    #[error(transparent)]
    Registry(RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns a static string representation for logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedMethod { .. } => "unsupported_method",
            Self::InvalidParams(_) => "invalid_params",
            Self::UnknownChain(_) => "unknown_chain",
            Self::ConflictingProofs { .. } => "conflicting_proofs",
            Self::Timeout => "timeout",
            Self::RegistryExhausted => "registry_exhausted",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::FinalityNotReached { .. } => "finality_not_reached",
            Self::Registry(_) => "registry",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the same call could succeed later without any change.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RegistryExhausted | Self::RetriesExhausted { .. } | Self::FinalityNotReached { .. }
        )
    }
}

impl From<BuildError> for DispatchError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::UnsupportedMethod { chain, method } => Self::UnsupportedMethod { chain, method },
            BuildError::InvalidParams { method, reason } => Self::InvalidParams(format!("{method}: {reason}")),
            BuildError::Encode(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownChain(id) => Self::UnknownChain(id),
            other => Self::Registry(other),
        }
    }
}

/// A terminal error plus the attempts that led to it.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct CallError {
    pub kind: DispatchError,
    pub trail: Vec<AttemptRecord>,
}

impl From<DispatchError> for CallError {
    fn from(kind: DispatchError) -> Self {
        Self { kind, trail: Vec::new() }
    }
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub chain: Arc<ChainDescriptor>,
    pub method: String,
    pub params: Vec<Value>,
    pub options: CallOptions,
}

/// Runs logical calls against the node registry.
pub struct Dispatcher {
    config: ArcSwap<DispatchConfig>,
    registry: Arc<NodeRegistry>,
    builder: Arc<RequestBuilder>,
    verifier: Arc<ProofVerifier>,
    cache: Arc<ResponseCache>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        registry: Arc<NodeRegistry>,
        builder: Arc<RequestBuilder>,
        verifier: Arc<ProofVerifier>,
        cache: Arc<ResponseCache>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self { config: ArcSwap::from_pointee(config), registry, builder, verifier, cache, transport }
    }

    /// Replaces the budgets used by calls started after this point.
    pub fn update_config(&self, config: DispatchConfig) {
        self.config.store(Arc::new(config));
        info!("dispatch configuration updated");
    }

    #[must_use]
    pub fn config(&self) -> Arc<DispatchConfig> {
        self.config.load_full()
    }

    /// Runs one logical call to a verified result or a terminal error.
    ///
    /// # Errors
    /// Returns [`CallError`] with the terminal [`DispatchError`] and the
    /// attempt trail.
    pub async fn call(
        &self,
        chain: Arc<ChainDescriptor>,
        method: &str,
        params: Vec<Value>,
        options: &CallOptions,
    ) -> Result<VerifiedResult, CallError> {
        let started = Instant::now();
        let chain_id = chain.id;
        let outcome = self.execute(chain, method, params, options).await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.kind.as_str(),
        };
        metrics::record_call(chain_id, method, label, started.elapsed());
        outcome
    }

    /// Runs every call concurrently; results keep the input order and fail
    /// independently.
    pub async fn call_batch(&self, calls: Vec<BatchCall>) -> Vec<Result<VerifiedResult, CallError>> {
        let concurrency = self.config.load().batch_concurrency.max(1);
        stream::iter(calls)
            .map(|call| async move { self.call(call.chain, &call.method, call.params, &call.options).await })
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn execute(
        &self,
        chain: Arc<ChainDescriptor>,
        method: &str,
        params: Vec<Value>,
        options: &CallOptions,
    ) -> Result<VerifiedResult, CallError> {
        let config = self.config.load_full();
        let mut machine = CallMachine::new();
        let chain_id = chain.id;

        let request = match self.builder.prepare(chain, method, params, options) {
            Ok(request) => Arc::new(request),
            Err(e) => {
                machine.advance(CallState::Failed);
                debug!(chain = chain_id, method = method, error = %e, "call rejected");
                return Err(CallError::from(DispatchError::from(e)));
            }
        };

        let fingerprint = Fingerprint::of(&request);
        if let Some(hit) = self.cache.get(&fingerprint) {
            machine.advance(CallState::Succeeded);
            debug!(chain = chain_id, method = method, "served from cache");
            return Ok(hit);
        }

        let call_timeout = options.timeout.unwrap_or(Duration::from_millis(config.call_timeout_ms));
        let max_retries = options.max_retries.unwrap_or(config.max_retries);
        let driven = tokio::time::timeout(call_timeout, self.drive(&request, &config, max_retries, &mut machine)).await;

        let kind = match driven {
            Ok(Ok(verification)) => {
                let ttl = TtlPolicy::for_request(&request, &self.cache.config());
                self.cache.put(fingerprint, verification.result.clone(), ttl);
                machine.advance(CallState::Succeeded);
                return Ok(verification.result);
            }
            Ok(Err(kind)) => kind,
            Err(_) => {
                for node in machine.abandon_in_flight(call_timeout) {
                    metrics::record_attempt(chain_id, AttemptOutcome::TimedOut.as_str());
                    self.registry.report_outcome(chain_id, &node, NodeOutcome::Timeout);
                }
                DispatchError::Timeout
            }
        };

        machine.advance(CallState::Failed);
        warn!(
            chain = chain_id,
            method = method,
            error = %kind,
            attempts = machine.trail().len(),
            "call failed"
        );
        Err(CallError { kind, trail: machine.into_trail() })
    }

    async fn drive(
        &self,
        request: &Arc<RpcRequest>,
        config: &DispatchConfig,
        max_retries: u32,
        machine: &mut CallMachine,
    ) -> Result<Verification, DispatchError> {
        let chain = &request.chain;
        let mut filter = CandidateFilter::requiring(self.builder.required_props(request));
        let mut retries = 0;
        let mut finality_waits = 0;

        loop {
            machine.advance(CallState::SelectingNodes);
            let candidates = self.registry.select_candidates(chain, config.redundancy, &filter)?;
            if candidates.is_empty() {
                return Err(if machine.only_timeouts() {
                    DispatchError::Timeout
                } else {
                    DispatchError::RegistryExhausted
                });
            }
            filter.exclude.extend(candidates.iter().map(|c| c.id.clone()));

            let wires = self.builder.build(request, &candidates)?;
            machine.advance(CallState::AwaitingResponses);
            let report = self.run_round(request, wires, config, machine).await;

            for reorg in report.verified.iter().filter_map(|v| v.reorg) {
                self.cache.invalidate_reorg(reorg.chain_id, reorg.from_block);
            }
            if let Some(winner) = race::select_winner(report.verified)? {
                return Ok(winner);
            }
            machine.advance(CallState::Retrying);

            if let Some((have, need)) = report.finality_short {
                if finality_waits >= config.max_finality_waits {
                    return Err(DispatchError::FinalityNotReached { have, need });
                }
                finality_waits += 1;
                filter.exclude.clear();
                debug!(
                    chain = chain.id,
                    method = %request.method,
                    have = have,
                    need = need,
                    wait = finality_waits,
                    "waiting for confirmations"
                );
                tokio::time::sleep(Duration::from_millis(config.finality_retry_delay_ms)).await;
                continue;
            }

            if retries >= max_retries {
                return Err(if machine.only_timeouts() {
                    DispatchError::Timeout
                } else {
                    DispatchError::RetriesExhausted { attempts: machine.trail().len() }
                });
            }
            retries += 1;
        }
    }
}

/// Node lists come from `in3_nodeList` on the registry's own chain and are
/// verified like any other call.
#[async_trait]
impl NodeListSource for Dispatcher {
    async fn fetch_node_list(&self, chain: &ChainDescriptor) -> Result<NodeList, RegistryError> {
        let result = self
            .call(Arc::new(chain.clone()), "in3_nodeList", Vec::new(), &CallOptions::default())
            .await
            .map_err(|e| RegistryError::Fetch(e.to_string()))?;
        serde_json::from_value(result.into_value()).map_err(|e| RegistryError::InvalidNodeList(e.to_string()))
    }
}

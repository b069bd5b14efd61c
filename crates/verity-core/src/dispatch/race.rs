//! One fan-out round: concurrent sends, verification on arrival, settle
//! window, and the tie-break between concurrently verified results.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::{cmp::Ordering, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    state::{AttemptOutcome, CallMachine, CallState},
    DispatchConfig, DispatchError, Dispatcher,
};
use crate::{
    metrics,
    proof::{Verification, VerificationError},
    registry::{NodeOutcome, PenaltyEffect},
    transport::{decode_response, TransportError},
    types::{RpcRequest, VerifiedResult, WireRequest},
};

/// What a round produced.
#[derive(Debug, Default)]
pub(super) struct RoundReport {
    pub verified: Vec<Verification>,
    /// Last finality shortfall seen, as `(have, need)`.
    pub finality_short: Option<(u64, u64)>,
}

impl Dispatcher {
    /// Sends every wire request concurrently and verifies responses as they
    /// arrive. After the first verified response, collection continues for the
    /// settle window; whatever is still in flight then is dropped unverified.
    ///
    /// Replacements are chosen per round, not per failed attempt: a node that
    /// fails fast is replaced only once its slowest sibling has answered or hit
    /// the attempt timeout.
    pub(super) async fn run_round(
        &self,
        request: &RpcRequest,
        wires: Vec<WireRequest>,
        config: &DispatchConfig,
        machine: &mut CallMachine,
    ) -> RoundReport {
        let attempt_timeout = Duration::from_millis(config.attempt_timeout_ms);
        let settle_window = Duration::from_millis(config.settle_window_ms);
        let transport = &self.transport;
        machine.launch(wires.iter().map(|wire| wire.node.clone()));

        let mut pending: FuturesUnordered<_> = wires
            .into_iter()
            .map(|wire| async move {
                let started = Instant::now();
                let sent = tokio::time::timeout(
                    attempt_timeout,
                    transport.send(&wire.endpoint, wire.body.clone(), attempt_timeout),
                )
                .await;
                (wire, started.elapsed(), sent)
            })
            .collect();

        let mut report = RoundReport::default();
        let mut settle_deadline: Option<Instant> = None;

        loop {
            let next = match settle_deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => pending.next().await,
            };
            let Some((wire, elapsed, sent)) = next else {
                break;
            };
            machine.advance(CallState::Verifying);

            let outcome = match sent {
                Err(_) => Err(AttemptOutcome::TimedOut),
                Ok(Err(TransportError::Timeout)) => Err(AttemptOutcome::TimedOut),
                Ok(Err(e)) => Err(AttemptOutcome::TransportFailed(e)),
                Ok(Ok(body)) => match decode_response(&wire.node, wire.id, &body) {
                    Err(e) => Err(AttemptOutcome::TransportFailed(e)),
                    Ok(raw) => self.verifier.verify(&raw, request).map_err(AttemptOutcome::Rejected),
                },
            };

            let chain_id = request.chain.id;
            let (attempt, node_outcome) = match outcome {
                Ok(verification) => {
                    let block = verification.result.proving_block_number();
                    debug!(chain = chain_id, node = %wire.node, block = block, "response verified");
                    report.verified.push(verification);
                    if settle_deadline.is_none() {
                        settle_deadline = Some(Instant::now() + settle_window);
                    }
                    (AttemptOutcome::Verified { block }, Some(NodeOutcome::Success { block: Some(block) }))
                }
                Err(AttemptOutcome::Rejected(error)) => {
                    if let VerificationError::InsufficientFinality { have, need } = error {
                        report.finality_short = Some((have, need));
                    }
                    let node_outcome = error
                        .penalizes_node()
                        .then(|| NodeOutcome::VerificationFailed { dishonest: error.is_dishonest() });
                    if error.is_dishonest() {
                        warn!(chain = chain_id, node = %wire.node, error = %error, "node returned a mismatching proof");
                    } else {
                        debug!(chain = chain_id, node = %wire.node, error = %error, "response rejected");
                    }
                    (AttemptOutcome::Rejected(error), node_outcome)
                }
                Err(AttemptOutcome::TimedOut) => {
                    debug!(chain = chain_id, node = %wire.node, "attempt timed out");
                    (AttemptOutcome::TimedOut, Some(NodeOutcome::Timeout))
                }
                Err(other) => {
                    debug!(chain = chain_id, node = %wire.node, outcome = other.as_str(), "attempt failed");
                    let remote = !matches!(&other, AttemptOutcome::TransportFailed(e) if e.is_local());
                    (other, remote.then_some(NodeOutcome::TransportError))
                }
            };

            metrics::record_attempt(chain_id, attempt.as_str());
            if let Some(node_outcome) = node_outcome {
                if let PenaltyEffect::Blacklisted { until } =
                    self.registry.report_outcome(chain_id, &wire.node, node_outcome)
                {
                    debug!(chain = chain_id, node = %wire.node, until = %until, "node blacklisted");
                }
            }
            machine.record(wire.node, attempt, elapsed);

            if pending.is_empty() {
                break;
            }
            machine.advance(CallState::AwaitingResponses);
        }

        if !pending.is_empty() {
            debug!(chain = request.chain.id, dropped = pending.len(), "cancelled outstanding attempts");
            machine.cancel_in_flight();
            // the settle window closed while waiting; the round ends in verification
            machine.advance(CallState::Verifying);
        }
        report
    }
}

/// Higher proving block first, then lower node id.
fn preference(a: &VerifiedResult, b: &VerifiedResult) -> Ordering {
    b.proving_block_number()
        .cmp(&a.proving_block_number())
        .then_with(|| a.node().cmp(b.node()))
}

/// Picks the result to return among concurrently verified ones.
///
/// Results at different heights are a benign race and the higher one wins.
/// Two results at the same height that disagree on value or block hash mean
/// a node is lying despite a valid-looking proof.
///
/// # Errors
/// [`DispatchError::ConflictingProofs`] carrying both disagreeing results.
pub(super) fn select_winner(mut verified: Vec<Verification>) -> Result<Option<Verification>, DispatchError> {
    verified.sort_by(|a, b| preference(&a.result, &b.result));

    for (i, a) in verified.iter().enumerate() {
        for b in verified.iter().skip(i + 1) {
            let (a, b) = (&a.result, &b.result);
            if a.proving_block_number() != b.proving_block_number() {
                continue;
            }
            if a.value() != b.value() || a.proving_block_hash() != b.proving_block_hash() {
                return Err(DispatchError::ConflictingProofs {
                    first: Box::new(a.clone()),
                    second: Box::new(b.clone()),
                });
            }
        }
    }
    Ok(verified.into_iter().next())
}

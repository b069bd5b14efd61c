//! Per-call state machine and attempt trail.
//!
//! ```text
//!   Init ──(cache hit)──────────────────────────────────────────▶ Succeeded
//!    │
//!    ▼
//!   SelectingNodes ──▶ AwaitingResponses ◀──▶ Verifying ──▶ Succeeded
//!    ▲                      │                    │
//!    │                      ▼                    ▼
//!    └──────────────── Retrying ◀────────────────┘
//!                           │
//!                           ▼
//!                         Failed   (also reachable from any non-terminal state)
//! ```

use std::{fmt, time::Duration};
use tracing::trace;

use crate::{
    proof::VerificationError,
    transport::TransportError,
    types::NodeId,
};

/// Lifecycle states of one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Init,
    SelectingNodes,
    AwaitingResponses,
    Verifying,
    Retrying,
    Succeeded,
    Failed,
}

impl CallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use CallState::{AwaitingResponses, Failed, Init, Retrying, SelectingNodes, Succeeded, Verifying};

        match (self, next) {
            (Succeeded | Failed, _) => false,
            (_, Failed) => true,
            (Init, Succeeded | SelectingNodes) |
            (SelectingNodes, AwaitingResponses) |
            (AwaitingResponses, Verifying | Retrying) |
            (Verifying, AwaitingResponses | Succeeded | Retrying) |
            (Retrying, SelectingNodes) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SelectingNodes => "selecting_nodes",
            Self::AwaitingResponses => "awaiting_responses",
            Self::Verifying => "verifying",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one request sent to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The response verified against the given proving block.
    Verified { block: u64 },
    Rejected(VerificationError),
    TransportFailed(TransportError),
    TimedOut,
}

impl AttemptOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "verified",
            Self::Rejected(_) => "rejected",
            Self::TransportFailed(_) => "transport_error",
            Self::TimedOut => "timeout",
        }
    }
}

/// Diagnostics of one attempt, surfaced with terminal errors.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub node: NodeId,
    /// Zero-based round the attempt belonged to.
    pub round: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// Drives [`CallState`] for one call and collects its attempt trail.
#[derive(Debug)]
pub struct CallMachine {
    state: CallState,
    round: u32,
    trail: Vec<AttemptRecord>,
    in_flight: Vec<NodeId>,
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallMachine {
    #[must_use]
    pub fn new() -> Self {
        Self { state: CallState::Init, round: 0, trail: Vec::new(), in_flight: Vec::new() }
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Moves to `next`. Illegal transitions are ignored and return `false`,
    /// so a terminal state is never left.
    pub fn advance(&mut self, next: CallState) -> bool {
        if !self.state.can_transition_to(next) {
            trace!(from = %self.state, to = %next, "ignored illegal call transition");
            return false;
        }
        if self.state == CallState::Retrying && next == CallState::SelectingNodes {
            self.round += 1;
        }
        trace!(from = %self.state, to = %next, round = self.round, "call transition");
        self.state = next;
        true
    }

    /// Marks requests to `nodes` as sent and awaiting an answer.
    pub fn launch(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.in_flight.extend(nodes);
    }

    pub fn record(&mut self, node: NodeId, outcome: AttemptOutcome, elapsed: Duration) {
        if let Some(pos) = self.in_flight.iter().position(|n| *n == node) {
            self.in_flight.swap_remove(pos);
        }
        self.trail.push(AttemptRecord { node, round: self.round, outcome, elapsed });
    }

    /// Forgets in-flight attempts that were dropped after a winner settled.
    pub fn cancel_in_flight(&mut self) {
        self.in_flight.clear();
    }

    /// Records every in-flight attempt as timed out and returns their nodes.
    /// Used when the call deadline cuts a round short.
    pub fn abandon_in_flight(&mut self, elapsed: Duration) -> Vec<NodeId> {
        let nodes = std::mem::take(&mut self.in_flight);
        for node in &nodes {
            self.trail.push(AttemptRecord {
                node: node.clone(),
                round: self.round,
                outcome: AttemptOutcome::TimedOut,
                elapsed,
            });
        }
        nodes
    }

    #[must_use]
    pub fn trail(&self) -> &[AttemptRecord] {
        &self.trail
    }

    #[must_use]
    pub fn into_trail(self) -> Vec<AttemptRecord> {
        self.trail
    }

    /// Whether at least one attempt failed and every failed attempt timed out.
    #[must_use]
    pub fn only_timeouts(&self) -> bool {
        let mut failures = self
            .trail
            .iter()
            .filter(|a| !matches!(a.outcome, AttemptOutcome::Verified { .. }))
            .peekable();
        failures.peek().is_some() &&
            failures.all(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::TimedOut | AttemptOutcome::TransportFailed(TransportError::Timeout)
                )
            })
    }
}

//! # Verity Core
//!
//! Verifying multi-chain RPC light client. Every response a node returns is
//! checked against cryptographic proof tied to locally trusted chain state
//! before it reaches the caller.
//!
//! - **[`registry`]**: candidate nodes per chain, reputation, weighted
//!   selection, blacklisting and on-chain node-list refresh.
//!
//! - **[`request`]**: method to proof-strategy table and wire request
//!   construction with verification metadata.
//!
//! - **[`transport`]**: the [`transport::Transport`] capability and its
//!   `reqwest` adapter.
//!
//! - **[`proof`]**: the proof verifier for account, UTXO, content-addressed and
//!   checkpoint chains, and the trust-anchor store it advances.
//!
//! - **[`cache`]**: verified-result cache keyed by request fingerprint.
//!
//! - **[`dispatch`]**: per-call state machine, redundant fan-out, retries and
//!   batch calls.
//!
//! - **[`client`]**: the caller-facing [`client::VerityClient`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           VerityClient                           │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                        Dispatcher                          │  │
//! │  │   ResponseCache   RequestBuilder   Transport   CallMachine │  │
//! │  └───────┬──────────────────┬─────────────────────────┬───────┘  │
//! │          │                  │                         │          │
//! │  ┌───────▼────────┐  ┌──────▼────────┐       ┌────────▼───────┐  │
//! │  │  NodeRegistry  │  │ ProofVerifier ├──────▶│TrustAnchorStore│  │
//! │  │ (SignerDirectory)◀─┤               │       │  (ArcSwap CAS)  │  │
//! │  └────────────────┘  └───────────────┘       └────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Call Flow
//!
//! ```text
//! call(chain, method, params)
//!       │
//!       ▼
//! ┌──────────────┐
//! │ proof lookup │ ─── no strategy ──► UnsupportedMethod
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ cache check  │ ─── hit ──► VerifiedResult
//! └──────┬───────┘
//!        ▼
//! ┌──────────────────────┐
//! │ select N candidates  │ ◄──────────────┐
//! └──────┬───────────────┘                │
//!        ▼                                │
//! ┌──────────────────────┐   rejected /   │
//! │ send, verify each    │ ── timeout ────┘ (penalize, retry)
//! │ response on arrival  │
//! └──────┬───────────────┘
//!        │ verified
//!        ▼
//! ┌──────────────────────┐
//! │ advance anchors,     │
//! │ cache, return        │
//! └──────────────────────┘
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod metrics;
pub mod persistence;
pub mod proof;
pub mod registry;
pub mod request;
pub mod transport;
pub mod types;
pub mod utils;

pub use client::{VerityClient, VerityClientBuilder};
pub use dispatch::{CallError, DispatchError};
pub use types::{CallOptions, ChainFamily, VerifiedResult};

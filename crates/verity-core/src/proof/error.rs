use thiserror::Error;

use crate::{crypto::CryptoError, utils::HexError};

/// Why a response was not accepted as verified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerificationError {
    #[error("response carries no proof")]
    MissingProof,

    #[error("malformed proof: {0}")]
    Malformed(String),

    /// Well-formed proof whose hashes or signatures do not match.
    #[error("proof mismatch: {0}")]
    Mismatch(String),

    #[error("insufficient finality: have {have} confirmations, need {need}")]
    InsufficientFinality { have: u64, need: u64 },

    #[error("header segment does not link to a trusted anchor")]
    Unanchored,

    /// The segment conflicts with anchors that carry at least as much weight.
    #[error("header segment loses fork choice against trusted anchors")]
    StaleFork,

    /// Trust anchors kept changing concurrently while committing.
    #[error("trust anchors changed concurrently")]
    StaleAnchor,
}

impl VerificationError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub(crate) fn mismatch(msg: impl Into<String>) -> Self {
        Self::Mismatch(msg.into())
    }

    /// Whether the node that produced the response should be penalized.
    #[must_use]
    pub fn penalizes_node(&self) -> bool {
        matches!(self, Self::MissingProof | Self::Malformed(_) | Self::Mismatch(_) | Self::Unanchored)
    }

    /// Whether the failure implies the node lied rather than misbehaved.
    #[must_use]
    pub fn is_dishonest(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }

    /// Returns a static string representation for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingProof => "missing_proof",
            Self::Malformed(_) => "malformed",
            Self::Mismatch(_) => "mismatch",
            Self::InsufficientFinality { .. } => "insufficient_finality",
            Self::Unanchored => "unanchored",
            Self::StaleFork => "stale_fork",
            Self::StaleAnchor => "stale_anchor",
        }
    }
}

impl From<HexError> for VerificationError {
    fn from(err: HexError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<rlp::DecoderError> for VerificationError {
    fn from(err: rlp::DecoderError) -> Self {
        Self::Malformed(format!("rlp: {err}"))
    }
}

impl From<CryptoError> for VerificationError {
    fn from(err: CryptoError) -> Self {
        Self::Malformed(format!("signature: {err}"))
    }
}

impl From<serde_json::Error> for VerificationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

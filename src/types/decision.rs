use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorCode;

/// Outcome of a pinning decision.
pub type Decision = Result<Accepted, Rejection>;

/// Why a connection was allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "via")]
pub enum Accepted {
    /// The presented leaf's pin is in the host's pin set.
    LeafPin,
    /// The presented leaf is byte-identical to one verified earlier.
    CachedLeaf,
    /// An intermediate or root at `index` in the fetched chain matched.
    ChainPin { index: usize },
    /// The chain's last certificate matched a managed trust root pin.
    ManagedTrustRoot,
    /// The host has no evaluable pins.
    Unpinned,
}

impl Accepted {
    /// Whether this acceptance came from a full chain verification, which is
    /// what allows the leaf to be cached.
    pub fn is_chain_verified(&self) -> bool {
        matches!(
            self,
            Accepted::ChainPin { .. } | Accepted::ManagedTrustRoot | Accepted::Unpinned
        )
    }
}

/// Step of the decision algorithm that produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LeafExtraction,
    PinLookup,
    ChainFetch,
    ChainCheck,
    ChainPinMatch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::LeafExtraction => "leaf_extraction",
            Stage::PinLookup => "pin_lookup",
            Stage::ChainFetch => "chain_fetch",
            Stage::ChainCheck => "chain_check",
            Stage::ChainPinMatch => "chain_pin_match",
        };
        f.write_str(s)
    }
}

/// A refused connection, with enough context to log and assert on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Rejection {
    pub code: ErrorCode,
    pub hostname: String,
    pub stage: Stage,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ErrorCode, hostname: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            code,
            hostname: hostname.to_string(),
            stage,
            message: message.into(),
        }
    }
}

use thiserror::Error;

use crate::types::decision::Rejection;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Pin authority error: {0}")]
    Authority(String),

    #[error("Chain fetch error: {0}")]
    ChainFetch(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[cfg(feature = "fetch")]
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Error codes for structured rejection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "EXTRACTION_FAILED")]
    ExtractionFailed,
    #[serde(rename = "CHAIN_FETCH_FAILED")]
    ChainFetchFailed,
    #[serde(rename = "CHAIN_TOO_SHORT")]
    ChainTooShort,
    #[serde(rename = "LEAF_MISMATCH")]
    LeafMismatch,
    #[serde(rename = "NO_MATCHING_PIN")]
    NoMatchingPin,
    #[serde(rename = "AUTHORITY_UNAVAILABLE")]
    AuthorityUnavailable,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorCode::ChainFetchFailed => "CHAIN_FETCH_FAILED",
            ErrorCode::ChainTooShort => "CHAIN_TOO_SHORT",
            ErrorCode::LeafMismatch => "LEAF_MISMATCH",
            ErrorCode::NoMatchingPin => "NO_MATCHING_PIN",
            ErrorCode::AuthorityUnavailable => "AUTHORITY_UNAVAILABLE",
        };
        write!(f, "{}", s)
    }
}

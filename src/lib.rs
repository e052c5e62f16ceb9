//! # chainpin
//!
//! Certificate pinning decisions for TLS handshake validation.
//!
//! Given the leaf certificate a server presented, the hostname being
//! connected to and a pin type, [`PinningEngine::decide`] says whether the
//! connection may proceed. Pins come from an external pin authority
//! ([`resolver::PinAuthority`]); the engine falls back to fetching the host's
//! chain over an independent connection ([`fetch::ChainFetcher`]) when the
//! leaf itself is not pinned, and caches leaves it has verified that way.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chainpin::config::EngineConfig;
//! use chainpin::resolver::StaticPinAuthority;
//! use chainpin::PinningEngine;
//!
//! let authority = StaticPinAuthority::from_json(
//!     "public-key-sha256",
//!     r#"{ "api.example.com": ["47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="] }"#,
//! )
//! .unwrap();
//! let engine = PinningEngine::with_tls_fetcher(Arc::new(authority), EngineConfig::default()).unwrap();
//!
//! # let leaf_der: Vec<u8> = vec![];
//! match engine.decide(&leaf_der, "api.example.com", "public-key-sha256") {
//!     Ok(how) => println!("allowed: {:?}", how),
//!     Err(rejection) => println!("denied: {}", rejection),
//! }
//! ```
//!
//! ## Decision order
//!
//! 1. Leaf pin in the host's pin set
//! 2. Leaf identical to the one last verified for the host
//! 3. Independently fetched chain whose leaf matches the presented one, with
//!    an intermediate or root pin in the host's pin set (or, for hosts with
//!    an empty pin set, a managed trust root pin on the chain's last entry)
//!
//! Hosts unknown to the authority are not pinned; they are accepted once
//! the chain fetch and leaf comparison succeed.
//!
//! ## Error Handling
//!
//! Rejections are [`Rejection`] values carrying an [`ErrorCode`], the host
//! and the [`Stage`] that failed. [`PinningEngine::should_proceed`] renders
//! a decision as `"SUCCESS"` or the rejection text for callers that need a
//! single string.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod resolver;
pub mod types;
pub mod verification;

pub use cache::{clear_cache, CertCache};
pub use error::{Error, ErrorCode};
pub use types::decision::{Accepted, Decision, Rejection, Stage};
pub use types::pinning::{PinType, WILDCARD_HOST};
pub use verification::{PinningEngine, SUCCESS};

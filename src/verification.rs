use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CertCache;
use crate::config::{AuthorityFailurePolicy, EngineConfig};
use crate::error::{Error, ErrorCode};
use crate::extract::extract_pin;
use crate::fetch::ChainFetcher;
use crate::resolver::{PinAuthority, PinSetResolver};
use crate::types::decision::{Accepted, Decision, Rejection, Stage};

/// Literal returned across the string boundary when a connection may proceed.
pub const SUCCESS: &str = "SUCCESS";

/// Decides whether a TLS connection presenting a given leaf may proceed.
///
/// Safe to share between threads; every decision is independent apart from
/// the certificate cache and the collaborators, which are thread-safe.
pub struct PinningEngine {
    resolver: PinSetResolver,
    fetcher: Arc<dyn ChainFetcher>,
    cache: Arc<CertCache>,
    config: EngineConfig,
}

impl PinningEngine {
    /// Engine backed by the process-wide certificate cache.
    pub fn new(authority: Arc<dyn PinAuthority>, fetcher: Arc<dyn ChainFetcher>) -> Self {
        Self::with_cache(authority, fetcher, CertCache::global())
    }

    pub fn with_cache(
        authority: Arc<dyn PinAuthority>,
        fetcher: Arc<dyn ChainFetcher>,
        cache: Arc<CertCache>,
    ) -> Self {
        Self {
            resolver: PinSetResolver::new(authority),
            fetcher,
            cache,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine that fetches chains over TLS using `config`'s port and timeout.
    #[cfg(feature = "fetch")]
    pub fn with_tls_fetcher(
        authority: Arc<dyn PinAuthority>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let fetcher = crate::fetch::TlsChainFetcher::new(&config)?;
        Ok(Self::new(authority, Arc::new(fetcher)).with_config(config))
    }

    pub fn cache(&self) -> &Arc<CertCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop every verified leaf held by this engine's cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Decide whether a connection to `hostname` presenting `leaf` may proceed.
    ///
    /// Checks, in order, stopping at the first that settles the outcome:
    /// 1. Compute the leaf's pin
    /// 2. Leaf pin in the host's pin set
    /// 3. Leaf identical to the one cached for the host
    /// 4. Fetch the host's chain independently and compare leaves
    /// 5. Intermediate/root pins, or managed trust roots for hosts with an
    ///    empty pin set
    ///
    /// Leaves accepted through steps 4-5 are cached for the host.
    pub fn decide(&self, leaf: &[u8], hostname: &str, pin_type: &str) -> Decision {
        // Step 1: Pin of the presented leaf
        let leaf_pin = extract_pin(leaf, pin_type).map_err(|e| {
            self.reject(
                ErrorCode::ExtractionFailed,
                hostname,
                Stage::LeafExtraction,
                format!(
                    "Unable to extract pin value from certificate for host {}: {}",
                    hostname, e
                ),
            )
        })?;

        // Step 2: Leaf pinned directly. Never cached, pins may rotate.
        let host_pins = self.lookup(hostname, pin_type, false)?;
        if host_pins.as_ref().is_some_and(|pins| pins.contains(&leaf_pin)) {
            debug!(host = %hostname, "leaf cert pin, connection allowed");
            return Ok(Accepted::LeafPin);
        }

        // Step 3: Previously verified leaf
        match self.cache.matches(hostname, leaf) {
            Some(true) => {
                debug!(host = %hostname, "cached cert match, connection allowed");
                return Ok(Accepted::CachedLeaf);
            }
            Some(false) => {
                info!(host = %hostname, "cached cert mismatch, evicting entry");
                self.cache.remove(hostname);
            }
            None => {}
        }

        // Step 4: Independent chain fetch
        let chain = self.fetcher.fetch_chain(hostname).map_err(|e| {
            self.reject(
                ErrorCode::ChainFetchFailed,
                hostname,
                Stage::ChainFetch,
                format!("Unable to fetch certificates for host {}: {}", hostname, e),
            )
        })?;
        // The leaf alone was already evaluated above
        if chain.len() < 2 {
            return Err(self.reject(
                ErrorCode::ChainTooShort,
                hostname,
                Stage::ChainCheck,
                format!(
                    "Certificate chain too small for host {} (length {})",
                    hostname,
                    chain.len()
                ),
            ));
        }
        if chain[0].as_slice() != leaf {
            return Err(self.reject(
                ErrorCode::LeafMismatch,
                hostname,
                Stage::ChainCheck,
                format!(
                    "Leaf certificate presented does not match the one fetched for host {} \
                     (presented sha256:{}, fetched sha256:{})",
                    hostname,
                    fingerprint(leaf),
                    fingerprint(&chain[0])
                ),
            ));
        }

        // Step 5: Intermediate/root pins
        let accepted = self.match_chain_pins(&chain, hostname, pin_type, host_pins)?;

        // Step 6: Remember the verified leaf
        if accepted.is_chain_verified() {
            self.cache.put(hostname, leaf);
            info!(host = %hostname, via = ?accepted, "new cert chain verified and cached");
        }
        Ok(accepted)
    }

    /// Pin matching over the fetched chain, excluding the leaf.
    fn match_chain_pins(
        &self,
        chain: &[Vec<u8>],
        hostname: &str,
        pin_type: &str,
        host_pins: Option<Vec<String>>,
    ) -> Decision {
        let mut start = 1;
        let mut managed = false;
        let mut pins = host_pins;

        // Known host without pins of its own: managed trust roots, which
        // only ever pin the root
        if pins.as_ref().is_some_and(|p| p.is_empty()) {
            pins = self.lookup(hostname, pin_type, true)?;
            start = chain.len() - 1;
            managed = true;
        }

        let pins = match pins {
            Some(pins) if !pins.is_empty() => pins,
            _ => {
                debug!(host = %hostname, "host not pinned");
                return Ok(Accepted::Unpinned);
            }
        };

        for (index, cert) in chain.iter().enumerate().skip(start) {
            let pin = extract_pin(cert, pin_type).map_err(|e| {
                self.reject(
                    ErrorCode::ExtractionFailed,
                    hostname,
                    Stage::ChainPinMatch,
                    format!(
                        "Unable to extract pin value for intermediate/root cert {} for host {}: {}",
                        index, hostname, e
                    ),
                )
            })?;
            if pins.contains(&pin) {
                debug!(host = %hostname, index, managed, "intermediate/root cert pin matched");
                return Ok(if managed {
                    Accepted::ManagedTrustRoot
                } else {
                    Accepted::ChainPin { index }
                });
            }
        }

        Err(self.reject(
            ErrorCode::NoMatchingPin,
            hostname,
            Stage::ChainPinMatch,
            format!("No matching intermediate/root cert pins for host {}", hostname),
        ))
    }

    /// Pin set lookup with the configured authority failure policy applied.
    fn lookup(
        &self,
        hostname: &str,
        pin_type: &str,
        wildcard: bool,
    ) -> Result<Option<Vec<String>>, Rejection> {
        let result = if wildcard {
            self.resolver.wildcard_pins(pin_type)
        } else {
            self.resolver.pins_for(hostname, pin_type)
        };
        match result {
            Ok(pins) => Ok(pins),
            Err(e) => match self.config.authority_failure {
                AuthorityFailurePolicy::TreatAsUnpinned => {
                    warn!(host = %hostname, wildcard, error = %e, "pin lookup failed, treating host as unpinned");
                    Ok(None)
                }
                AuthorityFailurePolicy::FailClosed => Err(self.reject(
                    ErrorCode::AuthorityUnavailable,
                    hostname,
                    Stage::PinLookup,
                    format!(
                        "Unable to look up {}pins for host {}: {}",
                        if wildcard { "managed trust root " } else { "" },
                        hostname,
                        e
                    ),
                )),
            },
        }
    }

    fn reject(&self, code: ErrorCode, hostname: &str, stage: Stage, message: String) -> Rejection {
        warn!(host = %hostname, code = %code, stage = %stage, "{}", message);
        Rejection::new(code, hostname, stage, message)
    }

    /// String form of [`decide`](Self::decide): [`SUCCESS`] if the connection
    /// may proceed, a description of the rejection otherwise.
    pub fn should_proceed(&self, leaf: &[u8], hostname: &str, pin_type: &str) -> String {
        render(self.decide(leaf, hostname, pin_type))
    }

    /// [`should_proceed`](Self::should_proceed) for the host of a request URL.
    pub fn should_proceed_for_url(&self, leaf: &[u8], url: &str, pin_type: &str) -> String {
        match host_of(url) {
            Ok(hostname) => self.should_proceed(leaf, &hostname, pin_type),
            Err(e) => e.to_string(),
        }
    }
}

/// Render a decision to the single-string protocol.
pub fn render(decision: Decision) -> String {
    match decision {
        Ok(_) => SUCCESS.to_string(),
        Err(rejection) => rejection.to_string(),
    }
}

/// Hostname a request URL connects to.
pub fn host_of(url: &str) -> Result<String, Error> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or(Error::Url(url::ParseError::EmptyHost))
}

fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

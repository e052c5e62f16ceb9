//! Pin authority abstraction.
//!
//! The pin authority supplies, per pin type, the pins acceptable for each
//! host it knows about. [`PinSetResolver`] narrows that down to one host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::Error;
use crate::types::pinning::{PinsDocument, WILDCARD_HOST};

// ---------------------------------------------------------------------------
// Authority trait
// ---------------------------------------------------------------------------

/// Source of the current host to pins mapping.
///
/// Implementations may be backed by a remote service, the local filesystem
/// or memory. They are queried once per decision, from many handshakes at
/// once.
pub trait PinAuthority: Send + Sync {
    /// Return every host's pins for `pin_type`.
    ///
    /// `Ok(None)` means the authority has no pins of this type at all.
    /// `Err` means the lookup itself could not be completed.
    fn pins(&self, pin_type: &str) -> Result<Option<PinsDocument>, Error>;
}

// ---------------------------------------------------------------------------
// PinSetResolver
// ---------------------------------------------------------------------------

/// Per-host view over a [`PinAuthority`].
#[derive(Clone)]
pub struct PinSetResolver {
    authority: Arc<dyn PinAuthority>,
}

impl PinSetResolver {
    pub fn new(authority: Arc<dyn PinAuthority>) -> Self {
        Self { authority }
    }

    /// Pins for `hostname`.
    ///
    /// - `Ok(None)`: the authority does not know the host.
    /// - `Ok(Some(empty))`: the host is known but has no pins of its own.
    /// - `Ok(Some(pins))`: the host is pinned.
    pub fn pins_for(&self, hostname: &str, pin_type: &str) -> Result<Option<Vec<String>>, Error> {
        let pins = self
            .authority
            .pins(pin_type)?
            .and_then(|mut all| all.remove(hostname));
        debug!(
            host = %hostname,
            pin_type = %pin_type,
            pins = pins.as_ref().map(|p| p.len()),
            "resolved pin set"
        );
        Ok(pins)
    }

    /// Managed trust root pins, published under the wildcard host.
    pub fn wildcard_pins(&self, pin_type: &str) -> Result<Option<Vec<String>>, Error> {
        self.pins_for(WILDCARD_HOST, pin_type)
    }
}

// ---------------------------------------------------------------------------
// StaticPinAuthority (in-memory, replaceable)
// ---------------------------------------------------------------------------

/// In-memory authority whose pins can be replaced while in use.
#[derive(Debug, Default)]
pub struct StaticPinAuthority {
    by_type: RwLock<HashMap<String, PinsDocument>>,
}

impl StaticPinAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an authority holding a single pins document for `pin_type`.
    pub fn with_pins(pin_type: &str, pins: PinsDocument) -> Self {
        let authority = Self::new();
        authority.set_pins(pin_type, pins);
        authority
    }

    /// Build from a JSON pins document (`{ "<host>": ["<pin>", ...] }`).
    pub fn from_json(pin_type: &str, json: &str) -> Result<Self, Error> {
        let pins: PinsDocument = serde_json::from_str(json)?;
        Ok(Self::with_pins(pin_type, pins))
    }

    /// Replace the pins for `pin_type`.
    pub fn set_pins(&self, pin_type: &str, pins: PinsDocument) {
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin_type.to_string(), pins);
    }

    /// Set the pins of a single host, leaving other hosts untouched.
    pub fn set_host_pins(&self, pin_type: &str, hostname: &str, pins: Vec<String>) {
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pin_type.to_string())
            .or_default()
            .insert(hostname.to_string(), pins);
    }

    /// Forget all pins of `pin_type`.
    pub fn remove_pins(&self, pin_type: &str) {
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(pin_type);
    }
}

impl PinAuthority for StaticPinAuthority {
    fn pins(&self, pin_type: &str) -> Result<Option<PinsDocument>, Error> {
        Ok(self
            .by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pin_type)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// LocalFileAuthority (reads pins documents from disk)
// ---------------------------------------------------------------------------

/// Reads pins documents from a local directory.
///
/// Expects one file per pin type named `{pin_type}.json`. A missing file
/// means the authority has no pins of that type; a file that cannot be read
/// or parsed is an authority failure.
pub struct LocalFileAuthority {
    pins_dir: PathBuf,
}

impl LocalFileAuthority {
    pub fn new(pins_dir: &Path) -> Self {
        Self {
            pins_dir: pins_dir.to_path_buf(),
        }
    }
}

impl PinAuthority for LocalFileAuthority {
    fn pins(&self, pin_type: &str) -> Result<Option<PinsDocument>, Error> {
        let path = self.pins_dir.join(format!("{}.json", pin_type));
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::Authority(format!("Cannot read {}: {}", path.display(), e)))?;
        let doc: PinsDocument = serde_json::from_str(&data)
            .map_err(|e| Error::Authority(format!("Invalid pins in {}: {}", path.display(), e)))?;
        Ok(Some(doc))
    }
}

// ---------------------------------------------------------------------------
// ChainAuthority (tries authorities in order)
// ---------------------------------------------------------------------------

/// Composite authority that asks a sequence of authorities in order until
/// one has pins for the requested type.
pub struct ChainAuthority {
    authorities: Vec<Box<dyn PinAuthority>>,
}

impl ChainAuthority {
    pub fn new(authorities: Vec<Box<dyn PinAuthority>>) -> Self {
        Self { authorities }
    }
}

impl PinAuthority for ChainAuthority {
    fn pins(&self, pin_type: &str) -> Result<Option<PinsDocument>, Error> {
        let mut last_err = None;
        for authority in &self.authorities {
            match authority.pins(pin_type) {
                Ok(Some(doc)) => return Ok(Some(doc)),
                Ok(None) => {}
                Err(e) => {
                    warn!(pin_type, error = %e, "pin authority failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        // A failed authority might have held the pins, so "no pins" is only
        // reported when every authority answered
        last_err.map_or(Ok(None), Err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PIN_TYPE: &str = "public-key-sha256";

    fn make_doc() -> PinsDocument {
        let mut doc = PinsDocument::new();
        doc.insert("api.example.com".to_string(), vec!["X".to_string()]);
        doc.insert("open.example.com".to_string(), vec![]);
        doc.insert(WILDCARD_HOST.to_string(), vec!["ROOT".to_string()]);
        doc
    }

    struct FailingAuthority;

    impl PinAuthority for FailingAuthority {
        fn pins(&self, _pin_type: &str) -> Result<Option<PinsDocument>, Error> {
            Err(Error::Authority("service unreachable".to_string()))
        }
    }

    // -- PinSetResolver ------------------------------------------------------

    #[test]
    fn test_resolver_three_outcomes() {
        let resolver =
            PinSetResolver::new(Arc::new(StaticPinAuthority::with_pins(PIN_TYPE, make_doc())));

        assert_eq!(
            resolver.pins_for("api.example.com", PIN_TYPE).unwrap(),
            Some(vec!["X".to_string()])
        );
        assert_eq!(
            resolver.pins_for("open.example.com", PIN_TYPE).unwrap(),
            Some(vec![])
        );
        assert_eq!(resolver.pins_for("other.example.com", PIN_TYPE).unwrap(), None);
    }

    #[test]
    fn test_resolver_wildcard() {
        let resolver =
            PinSetResolver::new(Arc::new(StaticPinAuthority::with_pins(PIN_TYPE, make_doc())));
        assert_eq!(
            resolver.wildcard_pins(PIN_TYPE).unwrap(),
            Some(vec!["ROOT".to_string()])
        );
    }

    #[test]
    fn test_resolver_unknown_pin_type() {
        let resolver =
            PinSetResolver::new(Arc::new(StaticPinAuthority::with_pins(PIN_TYPE, make_doc())));
        assert_eq!(
            resolver.pins_for("api.example.com", "certificate-sha1").unwrap(),
            None
        );
    }

    #[test]
    fn test_resolver_propagates_failure() {
        let resolver = PinSetResolver::new(Arc::new(FailingAuthority));
        assert!(matches!(
            resolver.pins_for("api.example.com", PIN_TYPE),
            Err(Error::Authority(_))
        ));
    }

    // -- StaticPinAuthority --------------------------------------------------

    #[test]
    fn test_static_authority_from_json() {
        let json = r#"{ "api.example.com": ["X", "Y"], "*": [] }"#;
        let authority = StaticPinAuthority::from_json(PIN_TYPE, json).unwrap();
        let doc = authority.pins(PIN_TYPE).unwrap().unwrap();
        assert_eq!(doc["api.example.com"], vec!["X", "Y"]);
        assert!(doc[WILDCARD_HOST].is_empty());
    }

    #[test]
    fn test_static_authority_rotation() {
        let authority = StaticPinAuthority::with_pins(PIN_TYPE, make_doc());
        authority.set_host_pins(PIN_TYPE, "api.example.com", vec!["Z".to_string()]);

        let doc = authority.pins(PIN_TYPE).unwrap().unwrap();
        assert_eq!(doc["api.example.com"], vec!["Z"]);
        assert!(doc.contains_key("open.example.com"));

        authority.remove_pins(PIN_TYPE);
        assert!(authority.pins(PIN_TYPE).unwrap().is_none());
    }

    // -- LocalFileAuthority --------------------------------------------------

    #[test]
    fn test_local_file_authority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(format!("{}.json", PIN_TYPE)),
            serde_json::to_string_pretty(&make_doc()).unwrap(),
        )
        .unwrap();

        let authority = LocalFileAuthority::new(dir.path());
        let doc = authority.pins(PIN_TYPE).unwrap().unwrap();
        assert_eq!(doc["api.example.com"], vec!["X"]);
    }

    #[test]
    fn test_local_file_authority_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let authority = LocalFileAuthority::new(dir.path());
        assert!(authority.pins(PIN_TYPE).unwrap().is_none());
    }

    #[test]
    fn test_local_file_authority_invalid_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.json", PIN_TYPE)), "not json").unwrap();

        let authority = LocalFileAuthority::new(dir.path());
        assert!(matches!(
            authority.pins(PIN_TYPE),
            Err(Error::Authority(_))
        ));
    }

    // -- ChainAuthority ------------------------------------------------------

    #[test]
    fn test_chain_authority_first_wins() {
        let mut first = PinsDocument::new();
        first.insert("a.com".to_string(), vec!["A".to_string()]);
        let mut second = PinsDocument::new();
        second.insert("b.com".to_string(), vec!["B".to_string()]);

        let chain = ChainAuthority::new(vec![
            Box::new(StaticPinAuthority::with_pins(PIN_TYPE, first)),
            Box::new(StaticPinAuthority::with_pins(PIN_TYPE, second)),
        ]);

        let doc = chain.pins(PIN_TYPE).unwrap().unwrap();
        assert!(doc.contains_key("a.com"));
        assert!(!doc.contains_key("b.com"));
    }

    #[test]
    fn test_chain_authority_skips_failures() {
        let chain = ChainAuthority::new(vec![
            Box::new(FailingAuthority),
            Box::new(StaticPinAuthority::with_pins(PIN_TYPE, make_doc())),
        ]);
        assert!(chain.pins(PIN_TYPE).unwrap().is_some());
    }

    #[test]
    fn test_chain_authority_all_failed() {
        let chain = ChainAuthority::new(vec![Box::new(FailingAuthority), Box::new(FailingAuthority)]);
        assert!(chain.pins(PIN_TYPE).is_err());
    }

    #[test]
    fn test_chain_authority_failure_not_masked_by_empty() {
        let chain = ChainAuthority::new(vec![
            Box::new(FailingAuthority),
            Box::new(StaticPinAuthority::new()),
        ]);
        assert!(matches!(chain.pins(PIN_TYPE), Err(Error::Authority(_))));

        let reversed = ChainAuthority::new(vec![
            Box::new(StaticPinAuthority::new()),
            Box::new(FailingAuthority),
        ]);
        assert!(reversed.pins(PIN_TYPE).is_err());
    }

    #[test]
    fn test_chain_authority_none_has_pins() {
        let chain = ChainAuthority::new(vec![
            Box::new(StaticPinAuthority::new()),
            Box::new(StaticPinAuthority::new()),
        ]);
        assert!(chain.pins(PIN_TYPE).unwrap().is_none());
    }
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pseudo-hostname under which the authority publishes managed trust root pins.
pub const WILDCARD_HOST: &str = "*";

/// Pins for every host known to the authority, for a single pin type.
///
/// This is the JSON shape `{ "<host>": ["<pin>", ...] }`. A host mapped to an
/// empty list is known but has no pins of its own.
pub type PinsDocument = HashMap<String, Vec<String>>;

/// Kind of pin computed from a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    /// Base64 SHA-256 of the DER-encoded SubjectPublicKeyInfo.
    #[serde(rename = "public-key-sha256")]
    PublicKeySha256,
}

impl PinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinType::PublicKeySha256 => "public-key-sha256",
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a pin type string is not one this crate can compute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized pin type '{0}'")]
pub struct UnknownPinType(pub String);

impl FromStr for PinType {
    type Err = UnknownPinType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public-key-sha256" => Ok(PinType::PublicKeySha256),
            other => Err(UnknownPinType(other.to_string())),
        }
    }
}

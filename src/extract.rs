//! Pin extraction from DER-encoded X.509 certificates.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::parse_x509_certificate;

use crate::types::pinning::PinType;

/// Why a pin could not be computed from a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("certificate could not be parsed: {0}")]
    MalformedCertificate(String),

    #[error("certificate has no encoded public key")]
    NoPublicKey,

    #[error("unrecognized pin type '{0}'")]
    UnsupportedPinType(String),
}

/// Compute the pin of `certificate` for the given pin type.
///
/// The certificate is parsed before the pin type is looked at, so a
/// malformed certificate is reported as such whatever the pin type.
///
/// # Errors
///
/// See [`ExtractionFailure`].
pub fn extract_pin(certificate: &[u8], pin_type: &str) -> Result<String, ExtractionFailure> {
    let (_, cert) = parse_x509_certificate(certificate)
        .map_err(|e| ExtractionFailure::MalformedCertificate(e.to_string()))?;

    match pin_type.parse::<PinType>() {
        Ok(PinType::PublicKeySha256) => {
            let spki = cert.public_key().raw;
            if spki.is_empty() {
                return Err(ExtractionFailure::NoPublicKey);
            }
            Ok(spki_pin(spki))
        }
        Err(unknown) => Err(ExtractionFailure::UnsupportedPinType(unknown.0)),
    }
}

/// Base64 SHA-256 of a DER-encoded SubjectPublicKeyInfo.
pub fn spki_pin(spki_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spki_der);
    general_purpose::STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) mod testing {
    /// A freshly generated self-signed certificate and its expected pin.
    pub(crate) struct TestCert {
        pub der: Vec<u8>,
        pub pin: String,
    }

    pub(crate) fn self_signed(host: &str) -> TestCert {
        let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        TestCert {
            der: certified.cert.der().to_vec(),
            pin: super::spki_pin(&certified.key_pair.public_key_der()),
        }
    }
}

//! Configuration for the pinning engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Connect timeout for the chain fetch probe.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Port the chain fetch probe connects to.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// What to do when the pin authority cannot answer a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityFailurePolicy {
    /// Reject the connection with `AUTHORITY_UNAVAILABLE`.
    #[default]
    FailClosed,
    /// Treat the failed lookup as "no entry for this host".
    TreatAsUnpinned,
}

/// Configuration for [`PinningEngine`](crate::verification::PinningEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Connect timeout for the chain fetch, also used as the socket
    /// read/write timeout during its handshake.
    pub connect_timeout_ms: u64,
    /// Port the chain fetch connects to.
    pub port: u16,
    pub authority_failure: AuthorityFailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            port: DEFAULT_HTTPS_PORT,
            authority_failure: AuthorityFailurePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be zero".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

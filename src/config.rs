//! Static service configuration and injected secrets
//!
//! `CustodyConfig` comes from a TOML file and holds nothing sensitive.
//! PINs and the seed phrase arrive separately as [`Secrets`], normally
//! from the environment of the process.

use std::fmt;
use std::path::{Path, PathBuf};

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CustodyResult;
use crate::model::{parse_network, Pin, SeedPhrase};

/// Environment variable overriding the PKCS#11 module path
pub const LIBRARY_ENV: &str = "P11_LIB";

/// PKCS#11 token labels are 32 bytes, space padded
const MAX_TOKEN_LABEL: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CustodyConfig {
    /// PKCS#11 module, e.g. /usr/lib/softhsm/libsofthsm2.so
    pub pkcs11_library: Option<PathBuf>,
    /// Label of the token that holds the master key
    pub application_name: String,
    pub master_key_label: String,
    /// Default network for requests that do not name one
    pub bitcoin_network: String,
    /// Default EIP-155 chain id
    pub ethereum_chain_id: u64,
    /// Exclusive lock file held while bootstrapping
    pub bootstrap_lock_path: Option<PathBuf>,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            pkcs11_library: None,
            application_name: "cryptographic_signature".to_string(),
            master_key_label: "Master-Key".to_string(),
            bitcoin_network: "testnet".to_string(),
            ethereum_chain_id: 1,
            bootstrap_lock_path: None,
        }
    }
}

impl CustodyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `P11_LIB` when it is set
    pub fn with_library_from_env(mut self) -> Self {
        if let Some(path) = std::env::var_os(LIBRARY_ENV).filter(|p| !p.is_empty()) {
            self.pkcs11_library = Some(PathBuf::from(path));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() || self.application_name.len() > MAX_TOKEN_LABEL {
            return Err(ConfigError::invalid(format!(
                "application_name must be 1 to {MAX_TOKEN_LABEL} bytes"
            )));
        }
        if self.master_key_label.is_empty() {
            return Err(ConfigError::invalid("master_key_label must not be empty"));
        }
        if self.ethereum_chain_id == 0 {
            return Err(ConfigError::invalid("ethereum_chain_id must be positive"));
        }
        self.network()?;
        Ok(())
    }

    pub fn library_path(&self) -> Result<&Path, ConfigError> {
        self.pkcs11_library
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(format!("pkcs11_library is not set (or {LIBRARY_ENV})")))
    }

    pub fn network(&self) -> Result<Network, ConfigError> {
        parse_network(&self.bitcoin_network).ok_or_else(|| {
            ConfigError::invalid(format!("unknown bitcoin_network {:?}", self.bitcoin_network))
        })
    }
}

/// PINs and seed phrase, never read from the configuration file
#[derive(Clone)]
pub struct Secrets {
    so_pin: Option<Pin>,
    user_pin: Pin,
    seed_phrase: Option<SeedPhrase>,
}

impl Secrets {
    /// The security officer PIN is only needed to initialize a token
    pub fn new(
        so_pin: Option<&str>,
        user_pin: &str,
        seed_phrase: Option<&str>,
    ) -> CustodyResult<Self> {
        let so_pin = so_pin
            .map(Pin::from_str)
            .transpose()
            .map_err(|e| ConfigError::invalid(format!("security officer PIN: {e}")))?;
        let user_pin =
            Pin::from_str(user_pin).map_err(|e| ConfigError::invalid(format!("user PIN: {e}")))?;
        let seed_phrase = seed_phrase.map(SeedPhrase::try_from).transpose()?;
        Ok(Self {
            so_pin,
            user_pin,
            seed_phrase,
        })
    }

    pub fn so_pin(&self) -> Option<&Pin> {
        self.so_pin.as_ref()
    }

    pub fn user_pin(&self) -> &Pin {
        &self.user_pin
    }

    pub fn seed_phrase(&self) -> Option<&SeedPhrase> {
        self.seed_phrase.as_ref()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("so_pin", &self.so_pin)
            .field("user_pin", &self.user_pin)
            .field("seed_phrase", &self.seed_phrase)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{reason}")]
    Invalid { reason: String },

    #[error("a security officer PIN is required to initialize the token")]
    SoPinMissing,

    #[error("cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            reason: reason.into(),
        }
    }
}

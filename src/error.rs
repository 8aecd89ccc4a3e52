//! Error types for hsm-custody
//!
//! This module defines the error hierarchy for all custody operations.
//! Errors are grouped by the component that raises them and every variant
//! maps onto one [`ErrorKind`] of the flat request-level taxonomy.

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{KeyMaterialError, KeyPathError, SeedPhraseError, UserRole};

/// Result type alias for custody operations
///
/// This is a convenience alias for `Result<T, CustodyError>`.
pub type CustodyResult<T> = Result<T, CustodyError>;

/// Top-level error type for all custody operations
#[derive(Error, Debug)]
pub enum CustodyError {
    /// Security token errors
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Master key storage and derivation errors
    #[error("Key custody error: {0}")]
    KeyCustody(#[from] KeyCustodyError),

    /// Key path could not be parsed or applied
    #[error("Invalid key path: {0}")]
    InvalidPath(#[from] KeyPathError),

    /// Request fields missing or invalid
    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] RequestError),

    /// Chain signing errors
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// Static configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Flat classification of every failure a request can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SlotNotFound,
    AuthFailed,
    MasterKeyNotFound,
    InvalidPath,
    MalformedRequest,
    IncompleteSignature,
    TokenUnavailable,
    Configuration,
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::Token(TokenError::SlotNotFound { .. })
            | CustodyError::Token(TokenError::NoFreeSlot { .. }) => ErrorKind::SlotNotFound,
            CustodyError::Token(TokenError::AuthFailed { .. }) => ErrorKind::AuthFailed,
            CustodyError::Token(TokenError::Unavailable { .. }) => ErrorKind::TokenUnavailable,
            CustodyError::KeyCustody(_) => ErrorKind::MasterKeyNotFound,
            CustodyError::InvalidPath(_) => ErrorKind::InvalidPath,
            CustodyError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            CustodyError::Signing(_) => ErrorKind::IncompleteSignature,
            CustodyError::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Security token errors
#[derive(Error, Debug)]
pub enum TokenError {
    /// Zero or several slots carry the application token label
    #[error("Expected exactly one slot with token label {label:?}, found {found}")]
    SlotNotFound { label: String, found: usize },

    /// Bootstrap found no uninitialized slot to claim
    #[error("No uninitialized slot available for token {label:?}")]
    NoFreeSlot { label: String },

    /// Login rejected by the token
    #[error("Login as {role:?} failed: {reason}")]
    AuthFailed { role: UserRole, reason: String },

    /// Driver-level fault
    #[error("Token unavailable: {reason}")]
    Unavailable { reason: String },
}

impl TokenError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        TokenError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Master key errors
#[derive(Error, Debug)]
pub enum KeyCustodyError {
    /// No master key object in the token
    #[error("Master key {label:?} not found in token")]
    MasterKeyNotFound { label: String },

    /// The stored object does not hold a valid master key
    #[error("Master key record is corrupt: {0}")]
    Corrupt(#[from] KeyMaterialError),

    /// The configured seed phrase is invalid
    #[error("Seed phrase error: {0}")]
    SeedPhrase(#[from] SeedPhraseError),

    /// Bootstrap needs a seed phrase but none was provided
    #[error("No seed phrase configured for master key creation")]
    SeedPhraseMissing,

    /// Extended key construction failed
    #[error("Master key derivation failed: {reason}")]
    Derivation { reason: String },
}

/// Request validation errors
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RequestError {
    pub(crate) fn invalid(field: &'static str, reason: impl ToString) -> Self {
        RequestError::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Chain signing errors
#[derive(Error, Debug)]
pub enum SigningError {
    /// Transaction is not fully or sufficiently signed
    #[error("Transaction is not fully signed or fees are insufficient: {reason}")]
    IncompleteSignature { reason: String },

    /// The chain signer refused the derived key
    #[error("Signer failed: {reason}")]
    SignerFailed { reason: String },
}

impl SigningError {
    pub(crate) fn incomplete(reason: impl Into<String>) -> Self {
        SigningError::IncompleteSignature {
            reason: reason.into(),
        }
    }
}

impl From<KeyMaterialError> for CustodyError {
    fn from(err: KeyMaterialError) -> Self {
        CustodyError::KeyCustody(KeyCustodyError::Corrupt(err))
    }
}

impl From<SeedPhraseError> for CustodyError {
    fn from(err: SeedPhraseError) -> Self {
        CustodyError::KeyCustody(KeyCustodyError::SeedPhrase(err))
    }
}

/// Convert PKCS#11 driver faults to our error type
impl From<cryptoki::error::Error> for CustodyError {
    fn from(err: cryptoki::error::Error) -> Self {
        CustodyError::Token(TokenError::unavailable(err.to_string()))
    }
}

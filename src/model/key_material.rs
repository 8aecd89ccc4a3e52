use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::KeyPath;

/// The 64-byte master key record kept inside the token
///
/// Layout is private key (bytes 0..32) followed by chain code (32..64).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKeyBlob {
    private_key: [u8; 32],
    chain_code: [u8; 32],
}

impl MasterKeyBlob {
    pub const LENGTH: usize = 64;

    pub fn from_parts(private_key: [u8; 32], chain_code: [u8; 32]) -> Self {
        Self {
            private_key,
            chain_code,
        }
    }

    pub fn from_slice(blob: &[u8]) -> Result<Self, KeyMaterialError> {
        if blob.len() != Self::LENGTH {
            return Err(KeyMaterialError::InvalidLength {
                expected: Self::LENGTH,
                actual: blob.len(),
            });
        }
        let mut key = Self::from_parts([0u8; 32], [0u8; 32]);
        key.private_key.copy_from_slice(&blob[..32]);
        key.chain_code.copy_from_slice(&blob[32..]);
        Ok(key)
    }

    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// Serialized record value, wiped when the returned buffer is dropped
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(Self::LENGTH));
        bytes.extend_from_slice(&self.private_key);
        bytes.extend_from_slice(&self.chain_code);
        bytes
    }

    pub fn is_erased(&self) -> bool {
        self.private_key.iter().chain(&self.chain_code).all(|b| *b == 0)
    }
}

impl fmt::Debug for MasterKeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKeyBlob([REDACTED])")
    }
}

/// Child key derived for a single request
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
    #[zeroize(skip)]
    path: KeyPath,
}

impl DerivedKey {
    pub fn new(secret: [u8; 32], chain_code: [u8; 32], path: KeyPath) -> Self {
        Self {
            secret,
            chain_code,
            path,
        }
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub fn is_erased(&self) -> bool {
        self.secret.iter().chain(&self.chain_code).all(|b| *b == 0)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey {{ path: {}, secret: [REDACTED] }}", self.path)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    #[error("Key must be exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Not a valid secp256k1 private key")]
    InvalidPrivateKey,
}

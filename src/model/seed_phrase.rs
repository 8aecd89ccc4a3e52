use std::fmt;

use bip39::{Language, Mnemonic};
use thiserror::Error;
use zeroize::Zeroizing;

/// BIP39 mnemonic the master key is generated from
#[derive(Clone, PartialEq, Eq)]
pub struct SeedPhrase(Mnemonic);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid mnemonic")]
pub struct SeedPhraseError {
    #[from]
    source: bip39::Error,
}

impl TryFrom<&str> for SeedPhrase {
    type Error = SeedPhraseError;

    fn try_from(phrase: &str) -> Result<Self, Self::Error> {
        let mnemonic = Mnemonic::parse_in(Language::English, phrase)?;
        Ok(SeedPhrase(mnemonic))
    }
}

impl SeedPhrase {
    /// PBKDF2 stretch of the mnemonic into the 64-byte BIP39 seed
    pub fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.0.to_seed(passphrase))
    }

    pub fn word_count(&self) -> usize {
        self.0.word_count()
    }
}

impl fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedPhrase([REDACTED; {} words])", self.word_count())
    }
}

use bip32::{ChildNumber, ExtendedKey, ExtendedKeyAttrs, Prefix, XPrv};
use tracing::debug;
use zeroize::Zeroize;

use crate::error::{CustodyResult, KeyCustodyError};
use crate::model::{DerivedKey, KeyMaterialError, KeyPath, KeyPathError, MasterKeyBlob, SeedPhrase};

/// BIP32 master key for a mnemonic with an empty passphrase
pub fn master_key_from_seed(seed_phrase: &SeedPhrase) -> CustodyResult<MasterKeyBlob> {
    let seed = seed_phrase.to_seed("");
    master_key_from_seed_bytes(&seed[..])
}

pub(crate) fn master_key_from_seed_bytes(seed: &[u8]) -> CustodyResult<MasterKeyBlob> {
    let root = XPrv::new(seed).map_err(|e| KeyCustodyError::Derivation {
        reason: e.to_string(),
    })?;
    let mut private_key = root.to_bytes();
    let blob = MasterKeyBlob::from_parts(private_key, root.attrs().chain_code);
    private_key.zeroize();
    Ok(blob)
}

fn root_key(master: &MasterKeyBlob) -> Result<XPrv, KeyMaterialError> {
    let mut key_bytes = [0u8; 33];
    key_bytes[1..].copy_from_slice(master.private_key());

    let extended = ExtendedKey {
        prefix: Prefix::XPRV,
        attrs: ExtendedKeyAttrs {
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_number: ChildNumber(0),
            chain_code: *master.chain_code(),
        },
        key_bytes,
    };
    key_bytes.zeroize();

    XPrv::try_from(extended).map_err(|_| KeyMaterialError::InvalidPrivateKey)
}

/// Derive the child key at `path` from the stored master key
///
/// # Errors
///
/// Returns errors if:
/// - The blob does not hold a valid secp256k1 scalar (`MasterKeyNotFound`)
/// - A derivation step produces an invalid key (`InvalidPath`)
pub fn derive(master: &MasterKeyBlob, path: &KeyPath) -> CustodyResult<DerivedKey> {
    debug!("Deriving key at {}", path);

    let mut key = root_key(master)?;
    for segment in path.segments() {
        let child = ChildNumber::new(segment.index, segment.hardened)
            .map_err(|_| KeyPathError::Derivation { segment: *segment })?;
        key = key
            .derive_child(child)
            .map_err(|_| KeyPathError::Derivation { segment: *segment })?;
    }

    let mut secret = key.to_bytes();
    let derived = DerivedKey::new(secret, key.attrs().chain_code, path.clone());
    secret.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::str::FromStr;

    const PHRASE: &str = "test walk nut penalty hip pave soap entry language right filter choice";

    fn master() -> MasterKeyBlob {
        master_key_from_seed(&SeedPhrase::try_from(PHRASE).unwrap()).unwrap()
    }

    fn path(text: &str) -> KeyPath {
        KeyPath::try_from(text).unwrap()
    }

    #[test]
    fn test_bip32_vector_1() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = master_key_from_seed_bytes(&seed).unwrap();
        assert_eq!(
            hex::encode(master.private_key()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(master.chain_code()),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );

        let child = derive(&master, &path("m/0'")).unwrap();
        assert_eq!(
            hex::encode(child.secret()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
    }

    #[test]
    fn test_matches_bitcoin_bip32() {
        let seed = SeedPhrase::try_from(PHRASE).unwrap().to_seed("");
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let reference = bitcoin::bip32::Xpriv::new_master(bitcoin::Network::Testnet, &seed[..])
            .unwrap()
            .derive_priv(
                &secp,
                &bitcoin::bip32::DerivationPath::from_str("m/44'/0'/0'/0/7").unwrap(),
            )
            .unwrap();

        let derived = derive(&master(), &path("m/44'/0'/0'/0/7")).unwrap();
        assert_eq!(derived.secret(), &reference.private_key.secret_bytes());
    }

    #[test]
    fn test_master_path_returns_master_key() {
        let master = master();
        let derived = derive(&master, &KeyPath::master()).unwrap();
        assert_eq!(derived.secret(), master.private_key());
        assert_eq!(derived.chain_code(), master.chain_code());
    }

    #[test]
    fn test_same_path_is_deterministic() {
        let master = master();
        let a = derive(&master, &path("m/44'/60'/0'/0/0")).unwrap();
        let b = derive(&master, &path("m/44'/60'/0'/0/0")).unwrap();
        assert_eq!(a.secret(), b.secret());
        assert_eq!(a.chain_code(), b.chain_code());
    }

    #[test]
    fn test_distinct_paths_give_distinct_keys() {
        let master = master();
        let paths = ["m/0", "m/0'", "m/1", "m/0/0", "m/44'/0'/0'/0/0", "m/44'/0'/0'/0/1"];
        let secrets: Vec<[u8; 32]> = paths
            .iter()
            .map(|p| *derive(&master, &path(p)).unwrap().secret())
            .collect();

        for (i, a) in secrets.iter().enumerate() {
            for b in &secrets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_invalid_master_scalar() {
        let zero = MasterKeyBlob::from_parts([0u8; 32], [1u8; 32]);
        let err = derive(&zero, &path("m/0")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MasterKeyNotFound);
    }
}

use bitcoin::secp256k1::{All, Secp256k1};

use crate::config::CustodyConfig;
use crate::error::{CustodyResult, RequestError};
use crate::logic::{ethereum_address, parse_request_network, BitcoinKey};
use crate::model::{AddressRequest, Chain, KeyPath, Pin};
use crate::ports::TokenDriver;

use super::derived_key::with_derived_key;

/// Public address of the key at the requested path
///
/// Bitcoin addresses default to the legacy script type on the configured
/// network; Ethereum addresses are EIP-55 checksummed.
pub fn get_address<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    secp: &Secp256k1<All>,
    request: &AddressRequest,
) -> CustodyResult<String> {
    let path = KeyPath::try_from(request.key_path.as_str())?;

    match request.chain {
        Chain::Bitcoin => {
            let network = parse_request_network(request.network.as_deref(), config.network()?)?;
            let script_type = request.script_type.unwrap_or_default();
            with_derived_key(driver, config, user_pin, &path, |key| {
                let key = BitcoinKey::new(secp, key)?;
                Ok(key.address(secp, script_type, network).to_string())
            })
        }
        Chain::Ethereum => {
            if request.script_type.is_some() {
                return Err(
                    RequestError::invalid("scriptType", "only applies to bitcoin addresses").into(),
                );
            }
            with_derived_key(driver, config, user_pin, &path, |key| {
                Ok(ethereum_address(key)?)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::BitcoinScriptType;
    use crate::use_cases::test_support::{bootstrapped, derived_at, key_at, user_pin};
    use bitcoin::Network;

    fn request(key_path: &str, chain: Chain) -> AddressRequest {
        AddressRequest {
            key_path: key_path.to_string(),
            chain,
            network: None,
            script_type: None,
        }
    }

    #[test]
    fn test_bitcoin_defaults_to_legacy_on_configured_network() {
        let (token, config, _) = bootstrapped();
        let address = get_address(
            &token,
            &config,
            &user_pin(),
            &Secp256k1::new(),
            &request("m/0'/0", Chain::Bitcoin),
        )
        .unwrap();

        let secp = Secp256k1::new();
        let expected = key_at("m/0'/0").address(&secp, BitcoinScriptType::Legacy, Network::Testnet);
        assert_eq!(address, expected.to_string());
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_bitcoin_script_type_and_network() {
        let (token, config, _) = bootstrapped();
        let address = get_address(
            &token,
            &config,
            &user_pin(),
            &Secp256k1::new(),
            &AddressRequest {
                network: Some("mainnet".to_string()),
                script_type: Some(BitcoinScriptType::Taproot),
                ..request("m/86'/0'/0'/0/0", Chain::Bitcoin)
            },
        )
        .unwrap();
        assert!(address.starts_with("bc1p"));
    }

    #[test]
    fn test_ethereum_address() {
        let (token, config, _) = bootstrapped();
        let address = get_address(
            &token,
            &config,
            &user_pin(),
            &Secp256k1::new(),
            &request("m/44'/60'/0'/0/0", Chain::Ethereum),
        )
        .unwrap();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert_eq!(
            address,
            ethereum_address(&derived_at("m/44'/60'/0'/0/0")).unwrap()
        );
    }

    #[test]
    fn test_script_type_rejected_for_ethereum() {
        let (token, config, _) = bootstrapped();
        let err = get_address(
            &token,
            &config,
            &user_pin(),
            &Secp256k1::new(),
            &AddressRequest {
                script_type: Some(BitcoinScriptType::Segwit),
                ..request("m/0", Chain::Ethereum)
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }

    #[test]
    fn test_address_before_bootstrap() {
        let (token, config, _) = bootstrapped();
        token.state().slots[0].objects.clear();
        let err = get_address(
            &token,
            &config,
            &user_pin(),
            &Secp256k1::new(),
            &request("m/0", Chain::Bitcoin),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MasterKeyNotFound);
    }
}

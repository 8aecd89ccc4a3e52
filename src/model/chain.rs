use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Chains the service signs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

/// Output script forms a single Bitcoin key can be spent from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BitcoinScriptType {
    /// P2PKH
    #[default]
    Legacy,
    /// P2WPKH
    Segwit,
    /// P2WPKH nested in P2SH
    SegwitP2sh,
    /// P2TR key path, no script tree
    Taproot,
}

impl BitcoinScriptType {
    pub const ALL: [BitcoinScriptType; 4] = [
        BitcoinScriptType::Legacy,
        BitcoinScriptType::Segwit,
        BitcoinScriptType::SegwitP2sh,
        BitcoinScriptType::Taproot,
    ];

    pub fn is_segwit(&self) -> bool {
        !matches!(self, BitcoinScriptType::Legacy)
    }
}

/// Parse a network name the way operators write it
pub fn parse_network(name: &str) -> Option<Network> {
    match name.trim().to_ascii_lowercase().as_str() {
        "main" | "mainnet" | "bitcoin" => Some(Network::Bitcoin),
        "test" | "testnet" | "testnet3" => Some(Network::Testnet),
        "signet" => Some(Network::Signet),
        "regtest" => Some(Network::Regtest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!(parse_network("mainnet"), Some(Network::Bitcoin));
        assert_eq!(parse_network("Main"), Some(Network::Bitcoin));
        assert_eq!(parse_network("testnet"), Some(Network::Testnet));
        assert_eq!(parse_network("regtest"), Some(Network::Regtest));
        assert_eq!(parse_network("dogecoin"), None);
    }

    #[test]
    fn test_script_type_serde() {
        let parsed: BitcoinScriptType = serde_json::from_str("\"segwit-p2sh\"").unwrap();
        assert_eq!(parsed, BitcoinScriptType::SegwitP2sh);
        assert_eq!(BitcoinScriptType::default(), BitcoinScriptType::Legacy);

        let chain: Chain = serde_json::from_str("\"ethereum\"").unwrap();
        assert_eq!(chain, Chain::Ethereum);
    }
}

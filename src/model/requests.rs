//! JSON request shapes accepted by the signing operations

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{BitcoinScriptType, Chain};
use crate::error::RequestError;

/// Previous output available for spending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinRef {
    pub transaction_id: String,
    pub index: u32,
    /// Amount in satoshis
    pub value: u64,
    /// Hex encoded locking script
    pub script_pub_key: String,
}

/// Pay `amount` to `to` with change back to `from`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinTransferRequest {
    pub key_path: String,
    #[serde(default)]
    pub network: Option<String>,
    pub from: String,
    pub to: String,
    /// Decimal BTC, e.g. "0.0015"
    pub amount: String,
    pub coins: Vec<CoinRef>,
    /// Satoshis per 1000 virtual bytes
    pub fee_rate: u64,
}

/// Sign the inputs of an already built transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinRawSignRequest {
    pub key_path: String,
    #[serde(default)]
    pub network: Option<String>,
    pub transaction_hex: String,
    pub coins: Vec<CoinRef>,
}

/// Account and storage slots pre-declared by a type 2 transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    pub address: String,
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

/// Ethereum transaction, legacy (EIP-155) or fee market (EIP-1559)
///
/// Numeric fields are decimal or `0x` hex strings. Legacy transactions
/// carry `gasPrice`. Type 2 transactions carry `maxFeePerGas` and
/// `maxPriorityFeePerGas` and may carry an `accessList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumSignRequest {
    pub key_path: String,
    /// `0` or `2`, inferred from the fee fields when absent
    #[serde(default, rename = "type")]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    /// Absent for contract creation
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub access_list: Option<Vec<AccessListEntry>>,
    pub nonce: String,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub key_path: String,
    pub chain: Chain,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub script_type: Option<BitcoinScriptType>,
}

/// Decode a request body, classifying any failure as a malformed request
pub fn parse_request<T: DeserializeOwned>(json: &str) -> Result<T, RequestError> {
    Ok(serde_json::from_str(json)?)
}

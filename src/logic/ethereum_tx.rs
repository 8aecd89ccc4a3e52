//! Ethereum transaction signing
//!
//! Quantities arrive as strings and are parsed into 256-bit integers
//! before being narrowed to the width each field carries on the wire.
//! Requests carrying fee-market fields become EIP-1559 transactions,
//! everything else is signed as a legacy EIP-155 transaction.

use std::str::FromStr;

use alloy::consensus::{SignableTransaction, Signed, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::eip2930::{AccessList, AccessListItem};
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use tracing::debug;

use crate::error::{CustodyResult, RequestError, SigningError};
use crate::model::{AccessListEntry, DerivedKey, EthereumSignRequest};

/// Parse a decimal or `0x`-prefixed hex quantity
pub fn parse_quantity(text: &str, field: &'static str) -> Result<U256, RequestError> {
    let text = text.trim();
    let (digits, radix) = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix as u32)) {
        return Err(RequestError::invalid(field, format!("{text:?} is not a number")));
    }
    U256::from_str_radix(digits, radix).map_err(|e| RequestError::invalid(field, e))
}

fn narrow<T: TryFrom<U256>>(value: U256, field: &'static str) -> Result<T, RequestError> {
    T::try_from(value).map_err(|_| RequestError::invalid(field, "value out of range"))
}

fn quantity<T: TryFrom<U256>>(text: &str, field: &'static str) -> Result<T, RequestError> {
    narrow(parse_quantity(text, field)?, field)
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RequestError> {
    value
        .as_deref()
        .ok_or(RequestError::MissingField { field })
}

fn parse_address(text: &str, field: &'static str) -> Result<Address, RequestError> {
    Address::from_str(text.trim()).map_err(|e| RequestError::invalid(field, e))
}

fn parse_access_list(entries: &[AccessListEntry]) -> Result<AccessList, RequestError> {
    entries
        .iter()
        .map(|entry| {
            let storage_keys = entry
                .storage_keys
                .iter()
                .map(|key| B256::from_str(key.trim()).map_err(|e| RequestError::invalid("accessList", e)))
                .collect::<Result<_, _>>()?;
            Ok(AccessListItem {
                address: parse_address(&entry.address, "accessList")?,
                storage_keys,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AccessList)
}

/// Envelope type requested for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionType {
    Legacy,
    Eip1559,
}

impl TransactionType {
    fn of(request: &EthereumSignRequest) -> Result<Self, RequestError> {
        match request.transaction_type.as_deref() {
            Some(text) => match quantity::<u8>(text, "type")? {
                0 => Ok(TransactionType::Legacy),
                2 => Ok(TransactionType::Eip1559),
                other => Err(RequestError::invalid(
                    "type",
                    format!("transaction type {other} is not supported"),
                )),
            },
            None if request.max_fee_per_gas.is_some()
                || request.max_priority_fee_per_gas.is_some()
                || request.access_list.is_some() =>
            {
                Ok(TransactionType::Eip1559)
            }
            None => Ok(TransactionType::Legacy),
        }
    }
}

/// Unsigned transaction of either supported envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthereumTransaction {
    Legacy(TxLegacy),
    Eip1559(TxEip1559),
}

impl EthereumTransaction {
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            EthereumTransaction::Legacy(tx) => tx.chain_id,
            EthereumTransaction::Eip1559(tx) => Some(tx.chain_id),
        }
    }

    pub fn to(&self) -> TxKind {
        match self {
            EthereumTransaction::Legacy(tx) => tx.to,
            EthereumTransaction::Eip1559(tx) => tx.to,
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            EthereumTransaction::Legacy(tx) => &tx.input,
            EthereumTransaction::Eip1559(tx) => &tx.input,
        }
    }
}

/// Validated form of an Ethereum signing request
#[derive(Debug, Clone)]
pub struct EthereumTransfer {
    pub from: Option<Address>,
    pub transaction: EthereumTransaction,
}

impl EthereumTransfer {
    pub fn parse(
        request: &EthereumSignRequest,
        default_chain_id: u64,
    ) -> Result<Self, RequestError> {
        let chain_id = match &request.chain_id {
            Some(text) => quantity(text, "chainId")?,
            None => default_chain_id,
        };
        if chain_id == 0 {
            return Err(RequestError::invalid("chainId", "must be positive"));
        }

        let to = match request.to.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => TxKind::Call(parse_address(text, "to")?),
            _ => TxKind::Create,
        };
        let input = match request.data.as_deref().map(str::trim) {
            Some(text) => {
                let digits = text.strip_prefix("0x").unwrap_or(text);
                Bytes::from(hex::decode(digits).map_err(|e| RequestError::invalid("data", e))?)
            }
            None => Bytes::new(),
        };
        let from = request
            .from
            .as_deref()
            .map(|text| parse_address(text, "from"))
            .transpose()?;
        let nonce = quantity(&request.nonce, "nonce")?;
        let gas_limit = quantity(&request.gas, "gas")?;
        let value = parse_quantity(&request.value, "value")?;

        let transaction = match TransactionType::of(request)? {
            TransactionType::Legacy => {
                if request.max_fee_per_gas.is_some()
                    || request.max_priority_fee_per_gas.is_some()
                    || request.access_list.is_some()
                {
                    return Err(RequestError::invalid(
                        "type",
                        "fee market fields need a type 2 transaction",
                    ));
                }
                EthereumTransaction::Legacy(TxLegacy {
                    chain_id: Some(chain_id),
                    nonce,
                    gas_price: quantity(required(&request.gas_price, "gasPrice")?, "gasPrice")?,
                    gas_limit,
                    to,
                    value,
                    input,
                })
            }
            TransactionType::Eip1559 => {
                if request.gas_price.is_some() {
                    return Err(RequestError::invalid(
                        "gasPrice",
                        "type 2 transactions use maxFeePerGas",
                    ));
                }
                let max_fee_per_gas: u128 = quantity(
                    required(&request.max_fee_per_gas, "maxFeePerGas")?,
                    "maxFeePerGas",
                )?;
                let max_priority_fee_per_gas: u128 = quantity(
                    required(&request.max_priority_fee_per_gas, "maxPriorityFeePerGas")?,
                    "maxPriorityFeePerGas",
                )?;
                if max_priority_fee_per_gas > max_fee_per_gas {
                    return Err(RequestError::invalid(
                        "maxPriorityFeePerGas",
                        "exceeds maxFeePerGas",
                    ));
                }
                EthereumTransaction::Eip1559(TxEip1559 {
                    chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to,
                    value,
                    access_list: parse_access_list(request.access_list.as_deref().unwrap_or(&[]))?,
                    input,
                })
            }
        };

        Ok(Self { from, transaction })
    }
}

fn signer(key: &DerivedKey) -> Result<PrivateKeySigner, SigningError> {
    PrivateKeySigner::from_slice(key.secret()).map_err(|e| SigningError::SignerFailed {
        reason: e.to_string(),
    })
}

/// EIP-55 checksummed account address of `key`
pub fn ethereum_address(key: &DerivedKey) -> Result<String, SigningError> {
    Ok(signer(key)?.address().to_checksum(None))
}

fn sign_envelope<T>(signer: &PrivateKeySigner, mut transaction: T) -> Result<TxEnvelope, SigningError>
where
    T: SignableTransaction<Signature>,
    TxEnvelope: From<Signed<T>>,
{
    let signature = signer
        .sign_transaction_sync(&mut transaction)
        .map_err(|e| SigningError::SignerFailed {
            reason: e.to_string(),
        })?;
    Ok(TxEnvelope::from(transaction.into_signed(signature)))
}

/// Sign with the chain id bound in and return the `0x` raw EIP-2718 encoding
pub fn sign_ethereum_transaction(
    key: &DerivedKey,
    transfer: &EthereumTransfer,
) -> CustodyResult<String> {
    let signer = signer(key)?;
    let address = signer.address();
    if let Some(from) = transfer.from {
        if from != address {
            return Err(RequestError::invalid(
                "from",
                format!("{from} is not the account at {}", key.path()),
            )
            .into());
        }
    }

    let envelope = match &transfer.transaction {
        EthereumTransaction::Legacy(tx) => sign_envelope(&signer, tx.clone())?,
        EthereumTransaction::Eip1559(tx) => sign_envelope(&signer, tx.clone())?,
    };
    debug!("Signed Ethereum transaction {} from {}", envelope.tx_hash(), address);

    Ok(format!("0x{}", hex::encode(envelope.encoded_2718())))
}

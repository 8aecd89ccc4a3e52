use crate::config::CustodyConfig;
use crate::error::CustodyResult;
use crate::logic::{sign_ethereum_transaction, EthereumTransfer};
use crate::model::{EthereumSignRequest, KeyPath, Pin};
use crate::ports::TokenDriver;

use super::derived_key::with_derived_key;

/// Sign a legacy or EIP-1559 transaction, returning the `0x` raw encoding
///
/// # Errors
///
/// Returns errors if:
/// - The key path is invalid (`InvalidPath`)
/// - A numeric field does not parse or does not fit (`MalformedRequest`)
/// - The fee fields do not match the transaction type (`MalformedRequest`)
/// - `from` is not the account of the key path (`MalformedRequest`)
pub fn sign_ethereum<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    request: &EthereumSignRequest,
) -> CustodyResult<String> {
    let path = KeyPath::try_from(request.key_path.as_str())?;
    let transfer = EthereumTransfer::parse(request, config.ethereum_chain_id)?;

    with_derived_key(driver, config, user_pin, &path, |key| {
        sign_ethereum_transaction(key, &transfer)
    })
}

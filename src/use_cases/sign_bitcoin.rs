use bitcoin::secp256k1::{All, Secp256k1};
use tracing::debug;

use crate::config::CustodyConfig;
use crate::error::CustodyResult;
use crate::logic::{build_and_sign_transfer, sign_raw, to_hex, BitcoinKey, RawSignPlan, TransferPlan};
use crate::model::{BitcoinRawSignRequest, BitcoinTransferRequest, KeyPath, Pin};
use crate::ports::TokenDriver;

use super::derived_key::with_derived_key;

/// Build, sign and verify a transfer, returning the transaction hex
///
/// The request is validated before the token is touched.
///
/// # Errors
///
/// Returns errors if:
/// - The key path is invalid (`InvalidPath`)
/// - Network, addresses, amount or coins are invalid (`MalformedRequest`)
/// - The coins do not cover amount and fee, or verification fails
///   (`IncompleteSignature`)
pub fn sign_bitcoin<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    secp: &Secp256k1<All>,
    request: &BitcoinTransferRequest,
) -> CustodyResult<String> {
    let path = KeyPath::try_from(request.key_path.as_str())?;
    let plan = TransferPlan::parse(request, config.network()?)?;
    debug!(
        "Bitcoin transfer of {} to {} on {} with {} coins",
        plan.amount,
        plan.to,
        plan.network,
        plan.coins.len()
    );

    with_derived_key(driver, config, user_pin, &path, |key| {
        let key = BitcoinKey::new(secp, key)?;
        let tx = build_and_sign_transfer(secp, &key, &plan)?;
        Ok(to_hex(&tx))
    })
}

/// Sign the inputs of a prepared transaction that belong to the key path
pub fn sign_bitcoin_raw<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    secp: &Secp256k1<All>,
    request: &BitcoinRawSignRequest,
) -> CustodyResult<String> {
    let path = KeyPath::try_from(request.key_path.as_str())?;
    let plan = RawSignPlan::parse(request, config.network()?)?;

    with_derived_key(driver, config, user_pin, &path, |key| {
        let key = BitcoinKey::new(secp, key)?;
        let tx = sign_raw(secp, &key, &plan)?;
        Ok(to_hex(&tx))
    })
}

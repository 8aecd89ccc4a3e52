//! Bitcoin transaction building, signing and verification
//!
//! A derived key can own coins under four script forms. Inputs are signed
//! for whichever form their previous output uses; everything else is left
//! alone. Every signed transaction is verified before it leaves this
//! module.

use std::collections::HashSet;
use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::key::{TapTweak, XOnlyPublicKey};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::{schnorr, All, Keypair, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, taproot, Address, Amount, CompressedPublicKey, Denomination, Network, NetworkKind,
    OutPoint, PublicKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use tracing::{debug, warn};

use crate::error::{CustodyResult, RequestError, SigningError};
use crate::model::{
    parse_network, BitcoinRawSignRequest, BitcoinScriptType, BitcoinTransferRequest, CoinRef,
    DerivedKey,
};

/// Change below this many satoshis is left to the miner
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

/// version, locktime, input and output counts
const TX_OVERHEAD_VBYTES: u64 = 10;

/// Signing key for one request, wiped on drop
pub struct BitcoinKey {
    secret: SecretKey,
    public: CompressedPublicKey,
}

impl BitcoinKey {
    pub fn new(secp: &Secp256k1<All>, key: &DerivedKey) -> Result<Self, SigningError> {
        let secret =
            SecretKey::from_slice(key.secret()).map_err(|e| SigningError::SignerFailed {
                reason: e.to_string(),
            })?;
        let public = CompressedPublicKey(secret.public_key(secp));
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public
    }

    pub fn address(
        &self,
        secp: &Secp256k1<All>,
        script_type: BitcoinScriptType,
        network: Network,
    ) -> Address {
        match script_type {
            BitcoinScriptType::Legacy => Address::p2pkh(self.public.pubkey_hash(), network),
            BitcoinScriptType::Segwit => Address::p2wpkh(&self.public, network),
            BitcoinScriptType::SegwitP2sh => Address::p2shwpkh(&self.public, network),
            BitcoinScriptType::Taproot => {
                Address::p2tr(secp, XOnlyPublicKey::from(self.public.0), None, network)
            }
        }
    }

    pub fn script_pubkey(&self, secp: &Secp256k1<All>, script_type: BitcoinScriptType) -> ScriptBuf {
        self.address(secp, script_type, Network::Bitcoin).script_pubkey()
    }

    /// Which of this key's script forms `script_pubkey` is, if any
    pub fn script_type_of(
        &self,
        secp: &Secp256k1<All>,
        script_pubkey: &Script,
    ) -> Option<BitcoinScriptType> {
        BitcoinScriptType::ALL
            .into_iter()
            .find(|script_type| self.script_pubkey(secp, *script_type).as_script() == script_pubkey)
    }
}

impl Drop for BitcoinKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// A previous output the request allows us to spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub output: TxOut,
}

/// Validated form of a transfer request
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub network: Network,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub coins: Vec<Coin>,
    /// satoshis per 1000 virtual bytes
    pub fee_rate: u64,
}

pub(crate) fn parse_request_network(
    network: Option<&str>,
    default: Network,
) -> Result<Network, RequestError> {
    match network {
        None => Ok(default),
        Some(name) => parse_network(name)
            .ok_or_else(|| RequestError::invalid("network", format!("unknown network {name:?}"))),
    }
}

fn parse_address(
    text: &str,
    network: Network,
    field: &'static str,
) -> Result<Address, RequestError> {
    Address::from_str(text.trim())
        .map_err(|e| RequestError::invalid(field, e))?
        .require_network(network)
        .map_err(|e| RequestError::invalid(field, e))
}

fn parse_amount(text: &str) -> Result<Amount, RequestError> {
    let amount = Amount::from_str_in(text.trim(), Denomination::Bitcoin)
        .map_err(|e| RequestError::invalid("amount", e))?;
    if amount == Amount::ZERO {
        return Err(RequestError::invalid("amount", "must be positive"));
    }
    Ok(amount)
}

fn parse_coins(coins: &[CoinRef]) -> Result<Vec<Coin>, RequestError> {
    let mut seen = HashSet::new();
    coins
        .iter()
        .map(|coin| {
            let txid = Txid::from_str(&coin.transaction_id)
                .map_err(|e| RequestError::invalid("coins", e))?;
            let script_pubkey = ScriptBuf::from_hex(&coin.script_pub_key)
                .map_err(|e| RequestError::invalid("coins", e))?;
            let outpoint = OutPoint::new(txid, coin.index);
            if !seen.insert(outpoint) {
                return Err(RequestError::invalid(
                    "coins",
                    format!("{outpoint} listed twice"),
                ));
            }
            Ok(Coin {
                outpoint,
                output: TxOut {
                    value: Amount::from_sat(coin.value),
                    script_pubkey,
                },
            })
        })
        .collect()
}

impl TransferPlan {
    pub fn parse(
        request: &BitcoinTransferRequest,
        default_network: Network,
    ) -> Result<Self, RequestError> {
        let network = parse_request_network(request.network.as_deref(), default_network)?;
        if request.fee_rate == 0 {
            return Err(RequestError::invalid("feeRate", "must be positive"));
        }
        Ok(Self {
            network,
            from: parse_address(&request.from, network, "from")?,
            to: parse_address(&request.to, network, "to")?,
            amount: parse_amount(&request.amount)?,
            coins: parse_coins(&request.coins)?,
            fee_rate: request.fee_rate,
        })
    }
}

/// Validated form of a raw signing request
#[derive(Debug, Clone)]
pub struct RawSignPlan {
    pub network: Network,
    pub transaction: Transaction,
    pub coins: Vec<Coin>,
}

impl RawSignPlan {
    pub fn parse(
        request: &BitcoinRawSignRequest,
        default_network: Network,
    ) -> Result<Self, RequestError> {
        let transaction: Transaction = deserialize_hex(request.transaction_hex.trim())
            .map_err(|e| RequestError::invalid("transactionHex", e))?;
        if transaction.input.is_empty() {
            return Err(RequestError::invalid("transactionHex", "transaction has no inputs"));
        }
        Ok(Self {
            network: parse_request_network(request.network.as_deref(), default_network)?,
            transaction,
            coins: parse_coins(&request.coins)?,
        })
    }
}

/// Upper bound of the virtual size an input adds once signed
fn input_vbytes(script_type: BitcoinScriptType) -> u64 {
    match script_type {
        BitcoinScriptType::Legacy => 149,
        BitcoinScriptType::Segwit => 69,
        BitcoinScriptType::SegwitP2sh => 92,
        BitcoinScriptType::Taproot => 58,
    }
}

fn output_vbytes(script_pubkey: &Script) -> u64 {
    9 + script_pubkey.len() as u64
}

pub fn estimate_vsize(inputs: &[BitcoinScriptType], outputs: &[&Script]) -> u64 {
    let segwit = inputs.iter().any(BitcoinScriptType::is_segwit);
    let overhead = TX_OVERHEAD_VBYTES + u64::from(segwit);
    overhead
        + inputs.iter().copied().map(input_vbytes).sum::<u64>()
        + outputs.iter().map(|spk| output_vbytes(spk)).sum::<u64>()
}

/// `vsize` at `fee_rate` satoshis per 1000 virtual bytes, rounded up
pub fn fee_for(vsize: u64, fee_rate: u64) -> Result<Amount, SigningError> {
    vsize
        .checked_mul(fee_rate)
        .map(|millisats| Amount::from_sat(millisats.div_ceil(1000)))
        .ok_or_else(|| SigningError::incomplete("fee overflows"))
}

/// Select coins in order, build the transfer and sign it
pub fn build_and_sign_transfer(
    secp: &Secp256k1<All>,
    key: &BitcoinKey,
    plan: &TransferPlan,
) -> CustodyResult<Transaction> {
    let to_spk = plan.to.script_pubkey();
    let dust = to_spk.minimal_non_dust();
    if plan.amount < dust {
        return Err(RequestError::invalid(
            "amount",
            format!("{} is below the {} dust threshold of {}", plan.amount, dust, plan.to),
        )
        .into());
    }
    let from = key.script_type_of(secp, &plan.from.script_pubkey());
    if from.is_none() {
        warn!("Change address {} is not controlled by the key path", plan.from);
    }

    let change_spk = plan.from.script_pubkey();

    let mut selected: Vec<(&Coin, BitcoinScriptType)> = Vec::new();
    let mut total = Amount::ZERO;
    let mut covered = None;
    for coin in &plan.coins {
        let Some(script_type) = key.script_type_of(secp, &coin.output.script_pubkey) else {
            warn!("Skipping coin {} not locked to the derived key", coin.outpoint);
            continue;
        };
        selected.push((coin, script_type));
        total = total
            .checked_add(coin.output.value)
            .ok_or_else(|| SigningError::incomplete("input total overflows"))?;

        let types: Vec<_> = selected.iter().map(|(_, t)| *t).collect();
        let vsize = estimate_vsize(&types, &[&to_spk, &change_spk]);
        let fee = fee_for(vsize, plan.fee_rate)?;
        let needed = plan
            .amount
            .checked_add(fee)
            .ok_or_else(|| SigningError::incomplete("amount overflows"))?;
        if total >= needed {
            covered = Some(fee);
            break;
        }
    }

    if selected.is_empty() {
        return Err(SigningError::incomplete("no coin is spendable by the derived key").into());
    }
    let Some(fee) = covered else {
        return Err(SigningError::incomplete(format!(
            "insufficient funds: {} available for {} plus fee",
            total, plan.amount
        ))
        .into());
    };

    let mut output = vec![TxOut {
        value: plan.amount,
        script_pubkey: to_spk,
    }];
    let change = total - plan.amount - fee;
    if change >= DUST_LIMIT {
        output.push(TxOut {
            value: change,
            script_pubkey: change_spk,
        });
    } else {
        debug!("Folding {} change into the fee", change);
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: selected
            .iter()
            .map(|(coin, _)| TxIn {
                previous_output: coin.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output,
    };

    let prevouts: Vec<Option<TxOut>> = selected
        .iter()
        .map(|(coin, _)| Some(coin.output.clone()))
        .collect();
    sign_inputs(secp, key, &mut tx, &prevouts)?;

    let prevouts: Vec<TxOut> = prevouts.into_iter().flatten().collect();
    verify_transaction(secp, &tx, &prevouts, Some(plan.fee_rate))?;
    debug!("Signed transfer {} ({} vbytes)", tx.compute_txid(), tx.vsize());
    Ok(tx)
}

/// Sign every input of a prepared transaction whose prevout is known
pub fn sign_raw(
    secp: &Secp256k1<All>,
    key: &BitcoinKey,
    plan: &RawSignPlan,
) -> CustodyResult<Transaction> {
    let mut tx = plan.transaction.clone();
    let prevouts: Vec<Option<TxOut>> = tx
        .input
        .iter()
        .map(|input| {
            plan.coins
                .iter()
                .find(|coin| coin.outpoint == input.previous_output)
                .map(|coin| coin.output.clone())
        })
        .collect();

    let signed = sign_inputs(secp, key, &mut tx, &prevouts)?;
    if signed == 0 {
        return Err(SigningError::incomplete("no input could be signed by the derived key").into());
    }

    let known: Vec<TxOut> = prevouts.iter().flatten().cloned().collect();
    if known.len() != tx.input.len() {
        return Err(SigningError::incomplete("a previous output is missing from coins").into());
    }
    verify_transaction(secp, &tx, &known, None)?;
    Ok(tx)
}

pub fn to_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}

/// Key-path tweaked keypair, wiped on drop
struct TaprootSigningKey(Keypair);

impl TaprootSigningKey {
    fn new(secp: &Secp256k1<All>, secret: &SecretKey) -> Self {
        let mut untweaked = Keypair::from_secret_key(secp, secret);
        let tweaked = untweaked.tap_tweak(secp, None).to_keypair();
        untweaked.non_secure_erase();
        Self(tweaked)
    }

    fn sign(&self, secp: &Secp256k1<All>, sighash: &Message) -> schnorr::Signature {
        secp.sign_schnorr_no_aux_rand(sighash, &self.0)
    }

    fn erase(&mut self) {
        self.0.non_secure_erase();
    }
}

impl Drop for TaprootSigningKey {
    fn drop(&mut self) {
        self.erase();
    }
}

enum InputSignature {
    ScriptSig(ScriptBuf),
    Witness(ScriptBuf, Witness),
}

fn push(bytes: Vec<u8>) -> Result<PushBytesBuf, SigningError> {
    PushBytesBuf::try_from(bytes).map_err(|e| SigningError::SignerFailed {
        reason: e.to_string(),
    })
}

fn message<T: Hash<Bytes = [u8; 32]>>(sighash: T) -> Message {
    Message::from_digest(sighash.to_byte_array())
}

fn signer_failed(e: impl ToString) -> SigningError {
    SigningError::SignerFailed {
        reason: e.to_string(),
    }
}

/// Sign the inputs this key owns and return how many were signed
pub fn sign_inputs(
    secp: &Secp256k1<All>,
    key: &BitcoinKey,
    tx: &mut Transaction,
    prevouts: &[Option<TxOut>],
) -> Result<usize, SigningError> {
    let mut signatures = Vec::new();
    {
        let mut cache = SighashCache::new(&*tx);
        for (index, prevout) in prevouts.iter().enumerate() {
            let Some(prevout) = prevout else {
                continue;
            };
            let Some(script_type) = key.script_type_of(secp, &prevout.script_pubkey) else {
                continue;
            };

            let signature = match script_type {
                BitcoinScriptType::Legacy => {
                    let sighash = cache
                        .legacy_signature_hash(
                            index,
                            &prevout.script_pubkey,
                            EcdsaSighashType::All.to_u32(),
                        )
                        .map_err(signer_failed)?;
                    let signature = ecdsa::Signature::sighash_all(
                        secp.sign_ecdsa_low_r(&message(sighash), &key.secret),
                    );
                    let script_sig = Builder::new()
                        .push_slice(push(signature.to_vec())?)
                        .push_key(&PublicKey::from(key.public))
                        .into_script();
                    InputSignature::ScriptSig(script_sig)
                }
                BitcoinScriptType::Segwit | BitcoinScriptType::SegwitP2sh => {
                    let redeem = ScriptBuf::new_p2wpkh(&key.public.wpubkey_hash());
                    let sighash = cache
                        .p2wpkh_signature_hash(
                            index,
                            &redeem,
                            prevout.value,
                            EcdsaSighashType::All,
                        )
                        .map_err(signer_failed)?;
                    let signature = ecdsa::Signature::sighash_all(
                        secp.sign_ecdsa_low_r(&message(sighash), &key.secret),
                    );
                    let witness = Witness::p2wpkh(&signature, &key.public.0);
                    let script_sig = if script_type == BitcoinScriptType::SegwitP2sh {
                        Builder::new()
                            .push_slice(push(redeem.to_bytes())?)
                            .into_script()
                    } else {
                        ScriptBuf::new()
                    };
                    InputSignature::Witness(script_sig, witness)
                }
                BitcoinScriptType::Taproot => {
                    let all: Vec<TxOut> = prevouts
                        .iter()
                        .cloned()
                        .collect::<Option<_>>()
                        .ok_or_else(|| {
                            SigningError::incomplete(
                                "taproot inputs need every previous output listed in coins",
                            )
                        })?;
                    let sighash = cache
                        .taproot_key_spend_signature_hash(
                            index,
                            &Prevouts::All(&all[..]),
                            TapSighashType::Default,
                        )
                        .map_err(signer_failed)?;
                    let signer = TaprootSigningKey::new(secp, &key.secret);
                    let signature = taproot::Signature {
                        signature: signer.sign(secp, &message(sighash)),
                        sighash_type: TapSighashType::Default,
                    };
                    InputSignature::Witness(ScriptBuf::new(), Witness::p2tr_key_spend(&signature))
                }
            };
            debug!("Signed input {} as {:?}", index, script_type);
            signatures.push((index, signature));
        }
    }

    let signed = signatures.len();
    for (index, signature) in signatures {
        let input = &mut tx.input[index];
        match signature {
            InputSignature::ScriptSig(script_sig) => {
                input.script_sig = script_sig;
                input.witness = Witness::new();
            }
            InputSignature::Witness(script_sig, witness) => {
                input.script_sig = script_sig;
                input.witness = witness;
            }
        }
    }
    Ok(signed)
}

fn pushes(script: &Script) -> Option<Vec<&[u8]>> {
    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes()),
            _ => None,
        })
        .collect()
}

fn verify_ecdsa(
    secp: &Secp256k1<All>,
    sighash: Message,
    signature: &ecdsa::Signature,
    public_key: &CompressedPublicKey,
) -> Result<(), String> {
    secp.verify_ecdsa(&sighash, &signature.signature, &public_key.0)
        .map_err(|e| e.to_string())
}

fn verify_input(
    secp: &Secp256k1<All>,
    cache: &mut SighashCache<&Transaction>,
    tx: &Transaction,
    index: usize,
    prevouts: &[TxOut],
) -> Result<(), String> {
    let input = &tx.input[index];
    let spk = &prevouts[index].script_pubkey;

    if spk.is_p2pkh() {
        let items = pushes(&input.script_sig).ok_or("script_sig is not push-only")?;
        let [signature, public_key] = items[..] else {
            return Err("script_sig must hold a signature and a public key".into());
        };
        let signature = ecdsa::Signature::from_slice(signature).map_err(|e| e.to_string())?;
        let public_key = CompressedPublicKey::from_slice(public_key).map_err(|e| e.to_string())?;
        if ScriptBuf::new_p2pkh(&public_key.pubkey_hash()) != *spk {
            return Err("public key does not match the previous output".into());
        }
        let sighash = cache
            .legacy_signature_hash(index, spk, signature.sighash_type.to_u32())
            .map_err(|e| e.to_string())?;
        return verify_ecdsa(secp, message(sighash), &signature, &public_key);
    }

    if spk.is_p2wpkh() || spk.is_p2sh() {
        if input.witness.len() != 2 {
            return Err("witness must hold a signature and a public key".into());
        }
        let signature = input.witness.nth(0).ok_or("missing signature")?;
        let public_key = input.witness.nth(1).ok_or("missing public key")?;
        let signature = ecdsa::Signature::from_slice(signature).map_err(|e| e.to_string())?;
        let public_key = CompressedPublicKey::from_slice(public_key).map_err(|e| e.to_string())?;
        let redeem = ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash());

        if spk.is_p2sh() {
            let expected = Address::p2shwpkh(&public_key, NetworkKind::Main).script_pubkey();
            let items = pushes(&input.script_sig).ok_or("script_sig is not push-only")?;
            if expected != *spk || items != [redeem.as_bytes()] {
                return Err("redeem script does not match the previous output".into());
            }
        } else if redeem != *spk {
            return Err("public key does not match the previous output".into());
        }

        let sighash = cache
            .p2wpkh_signature_hash(index, &redeem, prevouts[index].value, signature.sighash_type)
            .map_err(|e| e.to_string())?;
        return verify_ecdsa(secp, message(sighash), &signature, &public_key);
    }

    if spk.is_p2tr() {
        if input.witness.len() != 1 {
            return Err("only key path spends are supported".into());
        }
        let signature = input.witness.nth(0).ok_or("missing signature")?;
        let signature = taproot::Signature::from_slice(signature).map_err(|e| e.to_string())?;
        let output_key =
            XOnlyPublicKey::from_slice(&spk.as_bytes()[2..]).map_err(|e| e.to_string())?;
        let sighash = cache
            .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), signature.sighash_type)
            .map_err(|e| e.to_string())?;
        return secp
            .verify_schnorr(&signature.signature, &message(sighash), &output_key)
            .map_err(|e| e.to_string());
    }

    Err("unsupported previous output script".into())
}

fn total(values: impl Iterator<Item = Amount>) -> Option<Amount> {
    values.fold(Some(Amount::ZERO), |sum, value| sum?.checked_add(value))
}

/// Check signatures, value balance and, when given, the fee rate
pub fn verify_transaction(
    secp: &Secp256k1<All>,
    tx: &Transaction,
    prevouts: &[TxOut],
    min_fee_rate: Option<u64>,
) -> Result<(), SigningError> {
    if prevouts.len() != tx.input.len() {
        return Err(SigningError::incomplete("previous outputs do not match the inputs"));
    }

    let mut cache = SighashCache::new(tx);
    for index in 0..tx.input.len() {
        verify_input(secp, &mut cache, tx, index, prevouts).map_err(|reason| {
            SigningError::incomplete(format!("input {index} is not validly signed: {reason}"))
        })?;
    }

    let total_in = total(prevouts.iter().map(|p| p.value))
        .ok_or_else(|| SigningError::incomplete("input total overflows"))?;
    let total_out = total(tx.output.iter().map(|o| o.value))
        .ok_or_else(|| SigningError::incomplete("output total overflows"))?;
    let fee = total_in
        .checked_sub(total_out)
        .ok_or_else(|| SigningError::incomplete("outputs exceed inputs"))?;

    if let Some(rate) = min_fee_rate {
        let required = fee_for(tx.vsize() as u64, rate)?;
        if fee < required {
            return Err(SigningError::incomplete(format!(
                "fee {fee} is below the required {required}"
            )));
        }
    }
    Ok(())
}

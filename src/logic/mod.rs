mod bitcoin_tx;
mod derive_key;
mod ethereum_tx;

pub use bitcoin_tx::{
    build_and_sign_transfer, estimate_vsize, fee_for, sign_inputs, sign_raw, to_hex,
    verify_transaction, BitcoinKey, Coin, RawSignPlan, TransferPlan, DUST_LIMIT,
};
pub(crate) use bitcoin_tx::parse_request_network;
pub use derive_key::{derive, master_key_from_seed};
pub use ethereum_tx::{
    ethereum_address, parse_quantity, sign_ethereum_transaction, EthereumTransaction,
    EthereumTransfer,
};

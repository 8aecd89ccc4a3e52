//! Use cases (orchestration)
//!
//! Each use case drives the token through a [`SessionGuard`] and hands
//! derived keys to the chain logic. Requests are validated before a session
//! is opened, and key material never outlives the call that derived it.

mod bootstrap;
mod derived_key;
mod get_address;
mod master_key_store;
mod session;
mod sign_bitcoin;
mod sign_ethereum;

pub use bootstrap::{bootstrap, BootstrapReport};
pub use derived_key::with_derived_key;
pub use get_address::get_address;
pub use master_key_store::MasterKeyStore;
pub use session::{find_application_slot, SessionGuard};
pub use sign_bitcoin::{sign_bitcoin, sign_bitcoin_raw};
pub use sign_ethereum::sign_ethereum;

mod chain;
mod key_material;
mod key_path;
mod pin;
mod requests;
mod seed_phrase;
mod token;

pub use chain::{parse_network, BitcoinScriptType, Chain};
pub use key_material::{DerivedKey, KeyMaterialError, MasterKeyBlob};
pub use key_path::{ChildIndex, KeyPath, KeyPathError};
pub use pin::{Pin, PinError};
pub use requests::{
    parse_request, AccessListEntry, AddressRequest, BitcoinRawSignRequest, BitcoinTransferRequest,
    CoinRef, EthereumSignRequest,
};
pub use seed_phrase::{SeedPhrase, SeedPhraseError};
pub use token::{ObjectAttribute, ObjectClass, SessionMode, SlotInfo, UserRole};

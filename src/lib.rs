//! HSM-backed key custody for Bitcoin and Ethereum signing
//!
//! A BIP32 master key lives as a private data object inside a PKCS#11
//! token. Each request derives the child key it needs, uses it once and
//! wipes it before returning.

mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use adapters::{Pkcs11Driver, Pkcs11Session};
pub use config::{CustodyConfig, Secrets};
pub use error::{CustodyError, CustodyResult, ErrorKind};

// Re-export public API
pub use api::{connect, open, CustodyService};
pub use use_cases::BootstrapReport;

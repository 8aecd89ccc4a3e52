//! Ports (traits) for security token access
//!
//! The custody core depends on these abstractions, not on a concrete
//! PKCS#11 binding. An adapter provides slot enumeration and token
//! initialization through [`TokenDriver`] and per-request work through
//! [`TokenSession`].

#[cfg(test)]
pub mod contract_tests;
mod token;

pub use token::{TokenDriver, TokenSession};

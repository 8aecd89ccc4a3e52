use tracing::debug;
use zeroize::Zeroize;

use crate::config::CustodyConfig;
use crate::error::CustodyResult;
use crate::logic::derive;
use crate::model::{DerivedKey, KeyPath, Pin, SessionMode};
use crate::ports::TokenDriver;

use super::master_key_store::MasterKeyStore;
use super::session::SessionGuard;

/// Run `f` with the child key at `path`
///
/// Opens a read-only session on the application token, reads the master
/// key, derives the child and hands it to `f`. The master key and the
/// child are wiped and the session is released before this returns,
/// whatever `f` returns.
pub fn with_derived_key<D, T, F>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    path: &KeyPath,
    f: F,
) -> CustodyResult<T>
where
    D: TokenDriver,
    F: FnOnce(&DerivedKey) -> CustodyResult<T>,
{
    let mut slot = None;
    derive_into(driver, config, user_pin, path, &mut slot, f)
}

/// Like [`with_derived_key`], leaving the wiped key in `slot`
fn derive_into<D, T, F>(
    driver: &D,
    config: &CustodyConfig,
    user_pin: &Pin,
    path: &KeyPath,
    slot: &mut Option<DerivedKey>,
    f: F,
) -> CustodyResult<T>
where
    D: TokenDriver,
    F: FnOnce(&DerivedKey) -> CustodyResult<T>,
{
    let mut guard = SessionGuard::acquire(driver, &config.application_name, SessionMode::ReadOnly)?;
    let master = MasterKeyStore::new(&config.master_key_label).fetch(&mut guard, user_pin)?;
    guard.release();

    let derived = derive(&master, path);
    drop(master);
    let key = slot.insert(derived?);

    let result = f(&*key);
    key.zeroize();
    debug!("Key material for {} erased", path);
    result
}

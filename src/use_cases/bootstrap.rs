//! One-time token and master key setup

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, CustodyConfig, Secrets};
use crate::error::{CustodyError, CustodyResult, KeyCustodyError, TokenError};
use crate::logic::master_key_from_seed;
use crate::model::{Pin, SessionMode, UserRole};
use crate::ports::{TokenDriver, TokenSession};

use super::master_key_store::MasterKeyStore;
use super::session::{find_application_slot, SessionGuard};

/// What a bootstrap run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub token_initialized: bool,
    pub master_key_created: bool,
}

/// Exclusive advisory lock held for the duration of a bootstrap
struct BootstrapLock {
    file: File,
    path: PathBuf,
}

impl BootstrapLock {
    fn acquire(path: &Path) -> Result<Self, ConfigError> {
        let lock_error = |source| ConfigError::Lock {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_error)?;
        debug!("Waiting for bootstrap lock {:?}", path);
        FileExt::lock_exclusive(&file).map_err(lock_error)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Cannot release bootstrap lock {:?}: {}", self.path, e);
        }
    }
}

/// Make sure the application token and its master key exist
///
/// This function:
/// 1. Takes the bootstrap lock when one is configured
/// 2. Claims and initializes a free slot unless one already carries the
///    application label
/// 3. Creates the master key from the seed phrase unless it already exists
///
/// Running it again on a bootstrapped token changes nothing.
///
/// # Errors
///
/// Returns errors if:
/// - No slot carries the label and none is free (`SlotNotFound`)
/// - A token must be initialized and no security officer PIN was given
/// - A login is rejected (`AuthFailed`)
/// - The master key is missing and no seed phrase was provided
/// - The driver fails (`TokenUnavailable`)
pub fn bootstrap<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    secrets: &Secrets,
) -> CustodyResult<BootstrapReport> {
    let _lock = config
        .bootstrap_lock_path
        .as_deref()
        .map(BootstrapLock::acquire)
        .transpose()?;

    let (slot, token_initialized) = ensure_token(driver, config, secrets)?;
    let master_key_created = ensure_master_key(driver, slot, config, secrets)?;

    let report = BootstrapReport {
        token_initialized,
        master_key_created,
    };
    info!("Bootstrap finished: {:?}", report);
    Ok(report)
}

fn ensure_token<D: TokenDriver>(
    driver: &D,
    config: &CustodyConfig,
    secrets: &Secrets,
) -> CustodyResult<(D::Slot, bool)> {
    let label = &config.application_name;
    match find_application_slot(driver, label) {
        Ok(slot) => {
            debug!("Token {:?} already initialized", label);
            return Ok((slot, false));
        }
        Err(CustodyError::Token(TokenError::SlotNotFound { found: 0, .. })) => {}
        Err(e) => return Err(e),
    }

    let free: Vec<_> = driver
        .slots()?
        .into_iter()
        .filter(|info| !info.initialized)
        .collect();
    if free.is_empty() {
        return Err(TokenError::NoFreeSlot {
            label: label.clone(),
        }
        .into());
    }
    let so_pin = secrets.so_pin().ok_or(ConfigError::SoPinMissing)?;

    let mut last_error = None;
    for info in free {
        match initialize_slot(driver, info.slot, config, so_pin, secrets.user_pin()) {
            Ok(()) => {
                info!("Initialized token {:?} in slot {:?}", label, info.slot);
                return Ok((info.slot, true));
            }
            Err(e) => {
                warn!("Cannot initialize slot {:?}: {}", info.slot, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| TokenError::unavailable("no slot could be initialized").into()))
}

fn initialize_slot<D: TokenDriver>(
    driver: &D,
    slot: D::Slot,
    config: &CustodyConfig,
    so_pin: &Pin,
    user_pin: &Pin,
) -> CustodyResult<()> {
    driver.init_token(slot, so_pin, &config.application_name)?;

    let mut guard = SessionGuard::open(driver, slot, SessionMode::ReadWrite)?;
    guard.authenticate(UserRole::SecurityOfficer, so_pin)?;
    guard.session_mut()?.init_pin(user_pin)?;
    guard.logout()
}

fn ensure_master_key<D: TokenDriver>(
    driver: &D,
    slot: D::Slot,
    config: &CustodyConfig,
    secrets: &Secrets,
) -> CustodyResult<bool> {
    let store = MasterKeyStore::new(&config.master_key_label);

    let mut guard = SessionGuard::open(driver, slot, SessionMode::ReadWrite)?;
    guard.authenticate(UserRole::User, secrets.user_pin())?;
    let session = guard.session_mut()?;

    if store.exists(session)? {
        info!("Master key {:?} already exists", store.label());
        return Ok(false);
    }

    let seed_phrase = secrets
        .seed_phrase()
        .ok_or(KeyCustodyError::SeedPhraseMissing)?;
    let blob = master_key_from_seed(seed_phrase)?;
    let created = store.create_if_absent(session, &blob);
    drop(blob);

    guard.release();
    created
}

//! PKCS#11 adapter over cryptoki
//!
//! Works with any PKCS#11 module; development and CI use SoftHSM2.
//! Login state in PKCS#11 belongs to the application, not to a single
//! session, so the driver counts logged-in sessions per slot and only
//! issues the real `C_Logout` when the last one logs out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::object::{
    Attribute, AttributeType, ObjectClass as Pkcs11ObjectClass, ObjectHandle,
};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CustodyResult, TokenError};
use crate::model::{ObjectAttribute, ObjectClass, Pin, SessionMode, SlotInfo, UserRole};
use crate::ports::{TokenDriver, TokenSession};

#[derive(Debug, Clone, Copy)]
struct LoginState {
    role: UserRole,
    sessions: usize,
}

/// What the token answered to `C_Login`
#[derive(Debug)]
enum LoginOutcome {
    LoggedIn,
    AlreadyLoggedIn,
    Rejected(String),
}

/// Logged-in sessions per slot
///
/// PKCS#11 keeps one login state per application and slot, so a session
/// joins an existing login of the same role and only the last one to
/// leave issues the real `C_Logout`.
#[derive(Debug, Default)]
struct LoginRegistry {
    slots: HashMap<u64, LoginState>,
}

impl LoginRegistry {
    fn admit(&mut self, slot: u64, role: UserRole, outcome: LoginOutcome) -> Result<(), String> {
        match outcome {
            LoginOutcome::Rejected(reason) => return Err(reason),
            LoginOutcome::AlreadyLoggedIn if !self.slots.contains_key(&slot) => {
                return Err("token is logged in by another application".to_string())
            }
            LoginOutcome::LoggedIn | LoginOutcome::AlreadyLoggedIn => {}
        }

        let state = self.slots.entry(slot).or_insert(LoginState { role, sessions: 0 });
        if state.role != role {
            return Err(format!("token is logged in as {:?}", state.role));
        }
        state.sessions += 1;
        Ok(())
    }

    /// Returns true when the caller must log the token out
    fn leave(&mut self, slot: u64) -> bool {
        match self.slots.get_mut(&slot) {
            Some(state) if state.sessions > 1 => {
                state.sessions -= 1;
                false
            }
            _ => {
                self.slots.remove(&slot);
                true
            }
        }
    }

    #[cfg(test)]
    fn sessions(&self, slot: u64) -> usize {
        self.slots.get(&slot).map_or(0, |state| state.sessions)
    }
}

type LoginTable = Arc<Mutex<LoginRegistry>>;

#[derive(Clone)]
pub struct Pkcs11Driver {
    pkcs11: Arc<Pkcs11>,
    logins: LoginTable,
}

impl Pkcs11Driver {
    /// Load the PKCS#11 module and initialize it for OS thread locking
    pub fn new(library: &Path) -> CustodyResult<Self> {
        debug!("Loading PKCS#11 module {:?}", library);
        let pkcs11 = Pkcs11::new(library)?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;

        Ok(Self {
            pkcs11: Arc::new(pkcs11),
            logins: Arc::new(Mutex::new(LoginRegistry::default())),
        })
    }
}

impl TokenDriver for Pkcs11Driver {
    type Slot = Slot;
    type Session = Pkcs11Session;

    fn slots(&self) -> CustodyResult<Vec<SlotInfo<Slot>>> {
        let mut infos = Vec::new();
        for slot in self.pkcs11.get_slots_with_token()? {
            match self.pkcs11.get_token_info(slot) {
                Ok(info) => infos.push(SlotInfo {
                    slot,
                    label: info.label().trim_end().to_string(),
                    initialized: info.token_initialized(),
                }),
                Err(e) => warn!("Skipping slot {}: {}", slot.id(), e),
            }
        }
        Ok(infos)
    }

    fn init_token(&self, slot: Slot, so_pin: &Pin, label: &str) -> CustodyResult<()> {
        let pin = AuthPin::new(so_pin.expose().into());
        self.pkcs11.init_token(slot, &pin, label)?;
        Ok(())
    }

    fn open_session(&self, slot: Slot, mode: SessionMode) -> CustodyResult<Pkcs11Session> {
        let session = match mode {
            SessionMode::ReadOnly => self.pkcs11.open_ro_session(slot)?,
            SessionMode::ReadWrite => self.pkcs11.open_rw_session(slot)?,
        };
        Ok(Pkcs11Session {
            session,
            slot_id: slot.id(),
            logins: Arc::clone(&self.logins),
            logged_in: false,
        })
    }
}

pub struct Pkcs11Session {
    session: Session,
    slot_id: u64,
    logins: LoginTable,
    logged_in: bool,
}

fn user_type(role: UserRole) -> UserType {
    match role {
        UserRole::User => UserType::User,
        UserRole::SecurityOfficer => UserType::So,
    }
}

fn is_already_logged_in(err: &Pkcs11Error) -> bool {
    matches!(err, Pkcs11Error::Pkcs11(RvError::UserAlreadyLoggedIn, ..))
}

fn to_attribute(attribute: &ObjectAttribute) -> Attribute {
    match attribute {
        ObjectAttribute::Class(ObjectClass::Data) => Attribute::Class(Pkcs11ObjectClass::DATA),
        ObjectAttribute::Token(v) => Attribute::Token(*v),
        ObjectAttribute::Private(v) => Attribute::Private(*v),
        ObjectAttribute::Modifiable(v) => Attribute::Modifiable(*v),
        ObjectAttribute::Label(label) => Attribute::Label(label.clone()),
        ObjectAttribute::Value(value) => Attribute::Value(value.to_vec()),
    }
}

fn to_attributes(template: &[ObjectAttribute]) -> Vec<Attribute> {
    template.iter().map(to_attribute).collect()
}

fn wipe_values(attributes: &mut [Attribute]) {
    for attribute in attributes {
        if let Attribute::Value(value) = attribute {
            value.zeroize();
        }
    }
}

fn lock_table(table: &Mutex<LoginRegistry>) -> CustodyResult<MutexGuard<'_, LoginRegistry>> {
    table
        .lock()
        .map_err(|_| TokenError::unavailable("login table lock poisoned").into())
}

impl TokenSession for Pkcs11Session {
    type Handle = ObjectHandle;

    fn login(&mut self, role: UserRole, pin: &Pin) -> CustodyResult<()> {
        if self.logged_in {
            return Err(TokenError::AuthFailed {
                role,
                reason: "session already logged in".to_string(),
            }
            .into());
        }

        let table = Arc::clone(&self.logins);
        let mut logins = lock_table(&table)?;
        let auth_pin = AuthPin::new(pin.expose().into());
        let outcome = match self.session.login(user_type(role), Some(&auth_pin)) {
            Ok(()) => LoginOutcome::LoggedIn,
            Err(e) if is_already_logged_in(&e) => LoginOutcome::AlreadyLoggedIn,
            Err(e) => LoginOutcome::Rejected(e.to_string()),
        };
        logins
            .admit(self.slot_id, role, outcome)
            .map_err(|reason| TokenError::AuthFailed { role, reason })?;
        self.logged_in = true;
        Ok(())
    }

    fn logout(&mut self) -> CustodyResult<()> {
        if !self.logged_in {
            return Err(TokenError::unavailable("session is not logged in").into());
        }
        self.logged_in = false;

        let table = Arc::clone(&self.logins);
        let mut logins = lock_table(&table)?;
        if logins.leave(self.slot_id) {
            self.session.logout()?;
        }
        Ok(())
    }

    fn init_pin(&mut self, pin: &Pin) -> CustodyResult<()> {
        let auth_pin = AuthPin::new(pin.expose().into());
        self.session.init_pin(&auth_pin)?;
        Ok(())
    }

    fn find_objects(&mut self, template: &[ObjectAttribute]) -> CustodyResult<Vec<ObjectHandle>> {
        let mut attributes = to_attributes(template);
        let found = self.session.find_objects(&attributes);
        wipe_values(&mut attributes);
        Ok(found?)
    }

    fn create_object(&mut self, template: &[ObjectAttribute]) -> CustodyResult<ObjectHandle> {
        let mut attributes = to_attributes(template);
        let created = self.session.create_object(&attributes);
        wipe_values(&mut attributes);
        Ok(created?)
    }

    fn read_value(&mut self, handle: ObjectHandle) -> CustodyResult<Zeroizing<Vec<u8>>> {
        let mut attributes = self
            .session
            .get_attributes(handle, &[AttributeType::Value])?;
        let value = attributes.iter_mut().find_map(|attribute| match attribute {
            Attribute::Value(bytes) => Some(Zeroizing::new(std::mem::take(bytes))),
            _ => None,
        });
        wipe_values(&mut attributes);
        value.ok_or_else(|| TokenError::unavailable("object has no value attribute").into())
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        if self.logged_in {
            if let Err(e) = self.logout() {
                warn!("Logout while closing session failed: {}", e);
            }
        }
    }
}

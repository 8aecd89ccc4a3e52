//! In-memory token for tests
//!
//! Behaves like a PKCS#11 token for the calls the service makes and keeps
//! counters so tests can check that every opened session got closed.

use std::sync::{Arc, Mutex, MutexGuard};

use zeroize::Zeroizing;

use crate::error::{CustodyResult, TokenError};
use crate::model::{ObjectAttribute, ObjectClass, Pin, SessionMode, SlotInfo, UserRole};
use crate::ports::{TokenDriver, TokenSession};

#[derive(Debug, Clone, Default)]
pub struct FakeSlot {
    pub label: String,
    pub initialized: bool,
    pub so_pin: Option<Pin>,
    pub user_pin: Option<Pin>,
    pub objects: Vec<Vec<ObjectAttribute>>,
}

#[derive(Debug, Default)]
pub struct FakeTokenState {
    pub slots: Vec<FakeSlot>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub logins: usize,
    pub logouts: usize,
    pub fail_slots: bool,
    pub fail_open: bool,
    pub fail_logout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeToken {
    pub state: Arc<Mutex<FakeTokenState>>,
}

impl FakeToken {
    pub fn with_empty_slots(count: usize) -> Self {
        let token = Self::default();
        token.state().slots = vec![FakeSlot::default(); count];
        token
    }

    /// A token already initialized with `label` and both PINs
    pub fn with_application_slot(label: &str, so_pin: &str, user_pin: &str) -> Self {
        let token = Self::default();
        token.state().slots.push(FakeSlot {
            label: label.to_string(),
            initialized: true,
            so_pin: Some(Pin::from_str(so_pin).unwrap()),
            user_pin: Some(Pin::from_str(user_pin).unwrap()),
            objects: Vec::new(),
        });
        token
    }

    pub fn state(&self) -> MutexGuard<'_, FakeTokenState> {
        self.state.lock().unwrap()
    }

    /// Number of data objects labelled `label` across all slots
    pub fn master_key_records(&self, label: &str) -> usize {
        let wanted = ObjectAttribute::Label(label.as_bytes().to_vec());
        self.state()
            .slots
            .iter()
            .flat_map(|slot| &slot.objects)
            .filter(|object| object.contains(&wanted))
            .count()
    }

    pub fn sessions_balanced(&self) -> bool {
        let state = self.state();
        state.sessions_opened == state.sessions_closed
    }
}

fn slot_mut(state: &mut FakeTokenState, slot: usize) -> CustodyResult<&mut FakeSlot> {
    state
        .slots
        .get_mut(slot)
        .ok_or_else(|| TokenError::unavailable(format!("no slot {slot}")).into())
}

fn is_private(object: &[ObjectAttribute]) -> bool {
    object.contains(&ObjectAttribute::Private(true))
}

impl TokenDriver for FakeToken {
    type Slot = usize;
    type Session = FakeSession;

    fn slots(&self) -> CustodyResult<Vec<SlotInfo<usize>>> {
        let state = self.state();
        if state.fail_slots {
            return Err(TokenError::unavailable("CKR_DEVICE_ERROR").into());
        }
        Ok(state
            .slots
            .iter()
            .enumerate()
            .map(|(slot, info)| SlotInfo {
                slot,
                label: info.label.clone(),
                initialized: info.initialized,
            })
            .collect())
    }

    fn init_token(&self, slot: usize, so_pin: &Pin, label: &str) -> CustodyResult<()> {
        let mut state = self.state();
        let slot = slot_mut(&mut state, slot)?;
        *slot = FakeSlot {
            label: label.to_string(),
            initialized: true,
            so_pin: Some(so_pin.clone()),
            user_pin: None,
            objects: Vec::new(),
        };
        Ok(())
    }

    fn open_session(&self, slot: usize, mode: SessionMode) -> CustodyResult<FakeSession> {
        let mut state = self.state();
        if state.fail_open {
            return Err(TokenError::unavailable("CKR_DEVICE_REMOVED").into());
        }
        if !slot_mut(&mut state, slot)?.initialized {
            return Err(TokenError::unavailable("CKR_TOKEN_NOT_RECOGNIZED").into());
        }
        state.sessions_opened += 1;
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            slot,
            mode,
            role: None,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<FakeTokenState>>,
    slot: usize,
    mode: SessionMode,
    role: Option<UserRole>,
}

impl FakeSession {
    fn state(&self) -> MutexGuard<'_, FakeTokenState> {
        self.state.lock().unwrap()
    }

    fn visible(&self, object: &[ObjectAttribute]) -> bool {
        !is_private(object) || self.role == Some(UserRole::User)
    }
}

impl TokenSession for FakeSession {
    type Handle = usize;

    fn login(&mut self, role: UserRole, pin: &Pin) -> CustodyResult<()> {
        if self.role.is_some() {
            return Err(TokenError::AuthFailed {
                role,
                reason: "CKR_USER_ALREADY_LOGGED_IN".to_string(),
            }
            .into());
        }

        let accepted = {
            let mut state = self.state();
            let slot = self.slot;
            let expected = match role {
                UserRole::User => slot_mut(&mut state, slot)?.user_pin.clone(),
                UserRole::SecurityOfficer => slot_mut(&mut state, slot)?.so_pin.clone(),
            };
            let accepted = expected.as_ref() == Some(pin);
            if accepted {
                state.logins += 1;
            }
            accepted
        };

        if !accepted {
            return Err(TokenError::AuthFailed {
                role,
                reason: "CKR_PIN_INCORRECT".to_string(),
            }
            .into());
        }
        self.role = Some(role);
        Ok(())
    }

    fn logout(&mut self) -> CustodyResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_logout {
            return Err(TokenError::unavailable("CKR_DEVICE_ERROR").into());
        }
        if self.role.is_none() {
            return Err(TokenError::unavailable("CKR_USER_NOT_LOGGED_IN").into());
        }
        state.logouts += 1;
        self.role = None;
        Ok(())
    }

    fn init_pin(&mut self, pin: &Pin) -> CustodyResult<()> {
        if self.role != Some(UserRole::SecurityOfficer) {
            return Err(TokenError::unavailable("CKR_USER_NOT_LOGGED_IN").into());
        }
        let mut state = self.state();
        slot_mut(&mut state, self.slot)?.user_pin = Some(pin.clone());
        Ok(())
    }

    fn find_objects(&mut self, template: &[ObjectAttribute]) -> CustodyResult<Vec<usize>> {
        let mut state = self.state();
        let slot = slot_mut(&mut state, self.slot)?;
        Ok(slot
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| self.visible(object))
            .filter(|(_, object)| template.iter().all(|attr| object.contains(attr)))
            .map(|(handle, _)| handle)
            .collect())
    }

    fn create_object(&mut self, template: &[ObjectAttribute]) -> CustodyResult<usize> {
        if self.mode == SessionMode::ReadOnly {
            return Err(TokenError::unavailable("CKR_SESSION_READ_ONLY").into());
        }
        if is_private(template) && self.role != Some(UserRole::User) {
            return Err(TokenError::unavailable("CKR_USER_NOT_LOGGED_IN").into());
        }
        if !template.contains(&ObjectAttribute::Class(ObjectClass::Data)) {
            return Err(TokenError::unavailable("CKR_TEMPLATE_INCOMPLETE").into());
        }
        let mut state = self.state();
        let slot = slot_mut(&mut state, self.slot)?;
        slot.objects.push(template.to_vec());
        Ok(slot.objects.len() - 1)
    }

    fn read_value(&mut self, handle: usize) -> CustodyResult<Zeroizing<Vec<u8>>> {
        let mut state = self.state();
        let slot = slot_mut(&mut state, self.slot)?;
        let object = slot
            .objects
            .get(handle)
            .filter(|object| self.visible(object))
            .ok_or_else(|| TokenError::unavailable("CKR_OBJECT_HANDLE_INVALID"))?;
        let value = object.iter().find_map(|attr| match attr {
            ObjectAttribute::Value(value) => Some(value.clone()),
            _ => None,
        });
        value.ok_or_else(|| TokenError::unavailable("CKR_ATTRIBUTE_TYPE_INVALID").into())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.sessions_closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_tests_for;
    use crate::ports::contract_tests::token_contract;

    contract_tests_for!(
        fake_token_contract,
        make = || FakeToken::with_empty_slots(1),
        tests = {
            test_init_token_sets_label => token_contract::test_init_token_sets_label,
            test_user_login_after_init_pin => token_contract::test_user_login_after_init_pin,
            test_wrong_pin_rejected => token_contract::test_wrong_pin_rejected,
            test_data_object_roundtrip => token_contract::test_data_object_roundtrip,
            test_private_objects_hidden_before_login => token_contract::test_private_objects_hidden_before_login,
        }
    );

    #[test]
    fn test_sessions_counted_on_drop() {
        let token = FakeToken::with_application_slot("app", "87654321", "1234");
        {
            let _a = token.open_session(0, SessionMode::ReadOnly).unwrap();
            let _b = token.open_session(0, SessionMode::ReadWrite).unwrap();
            assert_eq!(token.state().sessions_opened, 2);
            assert_eq!(token.state().sessions_closed, 0);
        }
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_read_only_session_cannot_create() {
        let token = FakeToken::with_application_slot("app", "87654321", "1234");
        let mut session = token.open_session(0, SessionMode::ReadOnly).unwrap();
        session
            .login(UserRole::User, &Pin::from_str("1234").unwrap())
            .unwrap();
        let result = session.create_object(&[ObjectAttribute::Class(ObjectClass::Data)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_logout_requires_login() {
        let token = FakeToken::with_application_slot("app", "87654321", "1234");
        let mut session = token.open_session(0, SessionMode::ReadOnly).unwrap();
        assert!(session.logout().is_err());
        assert_eq!(token.state().logouts, 0);
    }
}

//! Scoped token sessions

use tracing::{debug, warn};

use crate::error::{CustodyResult, TokenError};
use crate::model::{Pin, SessionMode, UserRole};
use crate::ports::{TokenDriver, TokenSession};

/// The one initialized slot whose token label is `label`
pub fn find_application_slot<D: TokenDriver>(driver: &D, label: &str) -> CustodyResult<D::Slot> {
    let matching: Vec<_> = driver
        .slots()?
        .into_iter()
        .filter(|info| info.initialized && info.label == label)
        .collect();

    match matching.as_slice() {
        [only] => Ok(only.slot),
        _ => Err(TokenError::SlotNotFound {
            label: label.to_string(),
            found: matching.len(),
        }
        .into()),
    }
}

/// Exclusive session owned by a single request
///
/// Dropping the guard releases it: an authenticated session is logged out
/// first, and a failing logout is only logged.
pub struct SessionGuard<S: TokenSession> {
    session: Option<S>,
    authenticated: Option<UserRole>,
}

impl<S: TokenSession> SessionGuard<S> {
    pub fn open<D>(driver: &D, slot: D::Slot, mode: SessionMode) -> CustodyResult<Self>
    where
        D: TokenDriver<Session = S>,
    {
        let session = driver.open_session(slot, mode)?;
        debug!("Opened {:?} session on slot {:?}", mode, slot);
        Ok(Self {
            session: Some(session),
            authenticated: None,
        })
    }

    /// Open a session on the application slot
    pub fn acquire<D>(driver: &D, application_name: &str, mode: SessionMode) -> CustodyResult<Self>
    where
        D: TokenDriver<Session = S>,
    {
        let slot = find_application_slot(driver, application_name)?;
        Self::open(driver, slot, mode)
    }

    pub fn authenticate(&mut self, role: UserRole, pin: &Pin) -> CustodyResult<()> {
        self.session_mut()?.login(role, pin)?;
        self.authenticated = Some(role);
        Ok(())
    }

    /// Log out, keeping the role recorded until the token confirms it
    pub fn logout(&mut self) -> CustodyResult<()> {
        if self.authenticated.is_some() {
            self.session_mut()?.logout()?;
            self.authenticated = None;
        }
        Ok(())
    }

    pub fn session_mut(&mut self) -> CustodyResult<&mut S> {
        self.session
            .as_mut()
            .ok_or_else(|| TokenError::unavailable("session already released").into())
    }

    pub fn authenticated_as(&self) -> Option<UserRole> {
        self.authenticated
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Log out if needed and close the session; later calls do nothing
    pub fn release(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(role) = self.authenticated.take() {
            if let Err(e) = session.logout() {
                warn!("Logout of {:?} failed while releasing session: {}", role, e);
            }
        }
        drop(session);
        debug!("Session closed");
    }
}

impl<S: TokenSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake_token::FakeToken;
    use crate::error::ErrorKind;

    const APP: &str = "cryptographic_signature";

    fn token() -> FakeToken {
        FakeToken::with_application_slot(APP, "87654321", "1234")
    }

    fn user_pin() -> Pin {
        Pin::from_str("1234").unwrap()
    }

    #[test]
    fn test_acquire_finds_application_slot() {
        let token = token();
        let guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        assert!(guard.is_open());
        assert_eq!(token.state().sessions_opened, 1);
    }

    #[test]
    fn test_acquire_without_slot() {
        let token = FakeToken::with_empty_slots(2);
        let err = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SlotNotFound);
        assert_eq!(token.state().sessions_opened, 0);
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_acquire_with_ambiguous_slots() {
        let token = token();
        let duplicate = token.state().slots[0].clone();
        token.state().slots.push(duplicate);

        let err = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).err().unwrap();
        assert!(matches!(
            err,
            crate::error::CustodyError::Token(TokenError::SlotNotFound { found: 2, .. })
        ));
    }

    #[test]
    fn test_driver_fault_is_token_unavailable() {
        let token = token();
        token.state().fail_open = true;
        let err = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::TokenUnavailable);
    }

    #[test]
    fn test_release_is_idempotent() {
        let token = token();
        let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        guard.authenticate(UserRole::User, &user_pin()).unwrap();

        guard.release();
        guard.release();
        drop(guard);

        let state = token.state();
        assert_eq!(state.logouts, 1);
        assert_eq!(state.sessions_closed, 1);
    }

    #[test]
    fn test_drop_logs_out_and_closes() {
        let token = token();
        {
            let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
            guard.authenticate(UserRole::User, &user_pin()).unwrap();
        }
        assert_eq!(token.state().logouts, 1);
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_release_swallows_logout_failure() {
        let token = token();
        let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        guard.authenticate(UserRole::User, &user_pin()).unwrap();
        token.state().fail_logout = true;

        guard.release();
        assert!(!guard.is_open());
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_failed_logout_keeps_guard_authenticated() {
        let token = token();
        let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        guard.authenticate(UserRole::User, &user_pin()).unwrap();

        token.state().fail_logout = true;
        let err = guard.logout().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenUnavailable);
        assert_eq!(guard.authenticated_as(), Some(UserRole::User));

        // release retries the logout
        token.state().fail_logout = false;
        guard.release();
        assert_eq!(token.state().logouts, 1);
        assert!(token.sessions_balanced());
    }

    #[test]
    fn test_failed_login_leaves_guard_unauthenticated() {
        let token = token();
        let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        let err = guard
            .authenticate(UserRole::User, &Pin::from_str("0000").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
        assert_eq!(guard.authenticated_as(), None);

        guard.release();
        assert_eq!(token.state().logouts, 0);
    }

    #[test]
    fn test_session_unusable_after_release() {
        let token = token();
        let mut guard = SessionGuard::acquire(&token, APP, SessionMode::ReadOnly).unwrap();
        guard.release();
        assert_eq!(
            guard.session_mut().err().unwrap().kind(),
            ErrorKind::TokenUnavailable
        );
    }
}

use std::fmt;

use zeroize::Zeroizing;

use crate::error::CustodyResult;
use crate::model::{ObjectAttribute, Pin, SessionMode, SlotInfo, UserRole};

/// Capability to enumerate slots, initialize tokens and open sessions
///
/// Implementations must be usable from several threads at once when the
/// service is shared; every call opens independent driver state.
pub trait TokenDriver {
    type Slot: Copy + fmt::Debug + Send;
    type Session: TokenSession;

    /// List every slot that has a token present
    fn slots(&self) -> CustodyResult<Vec<SlotInfo<Self::Slot>>>;

    /// Initialize the token in `slot` with a security officer PIN and label
    ///
    /// # Errors
    ///
    /// Returns errors if:
    /// - The slot disappeared
    /// - The token refuses initialization
    fn init_token(&self, slot: Self::Slot, so_pin: &Pin, label: &str) -> CustodyResult<()>;

    /// Open a new unauthenticated session
    ///
    /// The session is closed when the returned value is dropped.
    fn open_session(&self, slot: Self::Slot, mode: SessionMode) -> CustodyResult<Self::Session>;
}

/// One open session with a token
pub trait TokenSession {
    type Handle: Copy + fmt::Debug;

    /// Log in as `role`
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` when the PIN is rejected or the session is
    /// already logged in.
    fn login(&mut self, role: UserRole, pin: &Pin) -> CustodyResult<()>;

    fn logout(&mut self) -> CustodyResult<()>;

    /// Set the normal user PIN; needs a security officer login
    fn init_pin(&mut self, pin: &Pin) -> CustodyResult<()>;

    /// Handles of every object matching all attributes of `template`
    fn find_objects(&mut self, template: &[ObjectAttribute]) -> CustodyResult<Vec<Self::Handle>>;

    fn create_object(&mut self, template: &[ObjectAttribute]) -> CustodyResult<Self::Handle>;

    /// The CKA_VALUE of an object
    fn read_value(&mut self, handle: Self::Handle) -> CustodyResult<Zeroizing<Vec<u8>>>;
}

//! Master key record inside the token

use tracing::{debug, info, warn};

use crate::error::{CustodyResult, KeyCustodyError};
use crate::model::{MasterKeyBlob, ObjectAttribute, ObjectClass, Pin, UserRole};
use crate::ports::TokenSession;

use super::session::SessionGuard;

/// Reads and writes the master key as a private, non-modifiable data object
#[derive(Debug, Clone)]
pub struct MasterKeyStore {
    label: String,
}

impl MasterKeyStore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn template(&self) -> Vec<ObjectAttribute> {
        vec![
            ObjectAttribute::Class(ObjectClass::Data),
            ObjectAttribute::Token(true),
            ObjectAttribute::Private(true),
            ObjectAttribute::Modifiable(false),
            ObjectAttribute::Label(self.label.as_bytes().to_vec()),
        ]
    }

    /// Whether a record exists; needs a user login for private objects
    pub fn exists<S: TokenSession>(&self, session: &mut S) -> CustodyResult<bool> {
        Ok(!session.find_objects(&self.template())?.is_empty())
    }

    /// Store `blob` unless a record with the label is already there
    ///
    /// Returns `true` when a record was created. The session must be
    /// logged in as the normal user.
    pub fn create_if_absent<S: TokenSession>(
        &self,
        session: &mut S,
        blob: &MasterKeyBlob,
    ) -> CustodyResult<bool> {
        if self.exists(session)? {
            info!("Master key {:?} already exists", self.label);
            return Ok(false);
        }

        let mut template = self.template();
        template.push(ObjectAttribute::Value(blob.to_bytes()));
        session.create_object(&template)?;
        info!("Master key {:?} created", self.label);
        Ok(true)
    }

    /// Read the master key, logging in as the user for the read only
    ///
    /// The session is logged out again on every path. A logout failure is
    /// logged and never replaces the result of the read.
    pub fn fetch<S: TokenSession>(
        &self,
        guard: &mut SessionGuard<S>,
        user_pin: &Pin,
    ) -> CustodyResult<MasterKeyBlob> {
        guard.authenticate(UserRole::User, user_pin)?;
        let blob = guard.session_mut().and_then(|session| self.read(session));
        if let Err(e) = guard.logout() {
            warn!("Logout after master key read failed: {}", e);
        }
        blob
    }

    fn read<S: TokenSession>(&self, session: &mut S) -> CustodyResult<MasterKeyBlob> {
        let handles = session.find_objects(&self.template())?;
        let Some(handle) = handles.first() else {
            return Err(KeyCustodyError::MasterKeyNotFound {
                label: self.label.clone(),
            }
            .into());
        };
        if handles.len() > 1 {
            warn!("{} master key records labelled {:?}, using the first", handles.len(), self.label);
        }

        let value = session.read_value(*handle)?;
        debug!("Read master key record ({} bytes)", value.len());
        Ok(MasterKeyBlob::from_slice(&value)?)
    }
}

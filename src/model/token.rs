//! Driver-neutral vocabulary for talking to a PKCS#11 style token

use std::fmt;

use zeroize::Zeroizing;

/// Session access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    ReadOnly,
    ReadWrite,
}

/// Who a session is logged in as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    User,
    SecurityOfficer,
}

/// Object classes the service stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Data,
}

/// Attribute used both in search templates and in object creation
#[derive(Clone, PartialEq, Eq)]
pub enum ObjectAttribute {
    Class(ObjectClass),
    Token(bool),
    Private(bool),
    Modifiable(bool),
    Label(Vec<u8>),
    Value(Zeroizing<Vec<u8>>),
}

impl fmt::Debug for ObjectAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectAttribute::Class(class) => write!(f, "Class({class:?})"),
            ObjectAttribute::Token(v) => write!(f, "Token({v})"),
            ObjectAttribute::Private(v) => write!(f, "Private({v})"),
            ObjectAttribute::Modifiable(v) => write!(f, "Modifiable({v})"),
            ObjectAttribute::Label(label) => {
                write!(f, "Label({:?})", String::from_utf8_lossy(label))
            }
            ObjectAttribute::Value(_) => write!(f, "Value([REDACTED])"),
        }
    }
}

/// What slot enumeration reports about one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo<S> {
    pub slot: S,
    /// Token label with the PKCS#11 space padding removed
    pub label: String,
    pub initialized: bool,
}

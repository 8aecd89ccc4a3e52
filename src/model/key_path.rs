use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One step of a key path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildIndex {
    pub index: u32,
    pub hardened: bool,
}

impl ChildIndex {
    pub const HARDENED_FLAG: u32 = 1 << 31;

    pub fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }

    pub fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    /// Index with the hardened bit applied, as used on the wire
    pub fn raw(&self) -> u32 {
        if self.hardened {
            self.index | Self::HARDENED_FLAG
        } else {
            self.index
        }
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Hierarchical derivation path such as `m/44'/0'/0'/0/0`
///
/// The leading `m` is optional and a bare `m` is the master key itself.
/// Hardened steps may be written with `'`, `h` or `H`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<ChildIndex>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyPathError {
    #[error("key path is empty")]
    Empty,

    #[error("empty segment at position {position}")]
    EmptySegment { position: usize },

    #[error("segment {segment:?} is not a decimal index")]
    NotNumeric { segment: String },

    #[error("segment {segment:?} is out of range (must be below 2^31)")]
    OutOfRange { segment: String },

    #[error("derivation failed at segment {segment}")]
    Derivation { segment: ChildIndex },
}

impl KeyPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[ChildIndex] {
        &self.0
    }

    pub fn indices(&self) -> Vec<u32> {
        self.0.iter().map(ChildIndex::raw).collect()
    }

    pub fn is_master(&self) -> bool {
        self.0.is_empty()
    }

    fn parse_segment(position: usize, segment: &str) -> Result<ChildIndex, KeyPathError> {
        if segment.is_empty() {
            return Err(KeyPathError::EmptySegment { position });
        }

        let (digits, hardened) = match segment.strip_suffix(['\'', 'h', 'H']) {
            Some(digits) => (digits, true),
            None => (segment, false),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeyPathError::NotNumeric {
                segment: segment.to_string(),
            });
        }

        let index = digits
            .parse::<u32>()
            .ok()
            .filter(|index| *index < ChildIndex::HARDENED_FLAG)
            .ok_or_else(|| KeyPathError::OutOfRange {
                segment: segment.to_string(),
            })?;

        Ok(ChildIndex { index, hardened })
    }
}

impl FromStr for KeyPath {
    type Err = KeyPathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KeyPathError::Empty);
        }

        let mut parts = text.split('/').peekable();
        if matches!(parts.peek(), Some(&"m") | Some(&"M")) {
            parts.next();
        }

        let segments = parts
            .enumerate()
            .map(|(position, segment)| Self::parse_segment(position, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KeyPath(segments))
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = KeyPathError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        path.parse()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

use std::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    str::FromStr,
};

use non_empty_string::NonEmptyString;
use serde::{Deserialize, Serialize};

/// A stable identifier assigned by the requirements-management tool.
///
/// Identifiers are opaque, non-empty strings. RM tools commonly export
/// numeric work-item ids, so integers are accepted on deserialization and
/// stored in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentifier", into = "String")]
pub struct RmId(NonEmptyString);

impl RmId {
    /// Creates a new `RmId` from a string.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyIdentifierError`] if the string is empty or consists
    /// only of whitespace.
    pub fn new(s: String) -> Result<Self, EmptyIdentifierError> {
        if s.trim().is_empty() {
            return Err(EmptyIdentifierError);
        }
        NonEmptyString::new(s)
            .map(Self)
            .map_err(|_| EmptyIdentifierError)
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Error returned when an identifier is empty.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("identifier must not be empty")]
pub struct EmptyIdentifierError;

impl TryFrom<String> for RmId {
    type Error = EmptyIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RmId {
    type Error = EmptyIdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl FromStr for RmId {
    type Err = EmptyIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl From<RmId> for String {
    fn from(id: RmId) -> Self {
        id.as_str().to_owned()
    }
}

// Must agree with `Borrow<str>` so `HashMap<RmId, _>` can be queried by `&str`.
impl Hash for RmId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl AsRef<str> for RmId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for RmId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RmId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for RmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire form of an identifier: either a string or an integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Int(i64),
    Str(String),
}

impl TryFrom<RawIdentifier> for RmId {
    type Error = EmptyIdentifierError;

    fn try_from(raw: RawIdentifier) -> Result<Self, Self::Error> {
        match raw {
            RawIdentifier::Int(i) => Self::new(i.to_string()),
            RawIdentifier::Str(s) => Self::new(s),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::constants::EVERYONE;
use crate::error::IdentifierError;

// User identity = the name a participant connected with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate a raw identifier.
    ///
    /// Rejects empty strings, control characters (which keeps the
    /// conversation key separator out of identifiers) and the reserved
    /// broadcast token.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(IdentifierError::ControlCharacter);
        }
        if raw == EVERYONE {
            return Err(IdentifierError::Reserved(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Where a message is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Broadcast to every connected user.
    Everyone,
    /// Direct message to a single user.
    User(UserId),
}

impl Recipient {
    /// Classify a raw receiver field. Absent, empty and `"everyone"` all
    /// mean broadcast.
    pub fn parse(raw: Option<&str>) -> Result<Self, IdentifierError> {
        match raw {
            None | Some("") | Some(EVERYONE) => Ok(Self::Everyone),
            Some(name) => UserId::parse(name).map(Self::User),
        }
    }

    /// The token this recipient contributes to a conversation key.
    pub fn token(&self) -> &str {
        match self {
            Self::Everyone => EVERYONE,
            Self::User(id) => id.as_str(),
        }
    }
}

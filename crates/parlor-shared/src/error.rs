use thiserror::Error;

/// Reasons a string is not a usable user identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier contains a control character")]
    ControlCharacter,

    #[error("identifier '{0}' is reserved")]
    Reserved(String),
}

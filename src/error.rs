use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::combo::trie::ComboError;
use crate::host::HostError;
use crate::keys::{KeyCode, KeyRef, LayerId};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum KeypinError {
    #[error(transparent)]
    Combo(#[from] ComboError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("No active tab.")]
    NoActiveTab,

    #[error("Tab is already pinned to {0}.")]
    DuplicatePin(KeyRef),

    #[error("No free key slot in layer {0}.")]
    NoFreeKey(LayerId),

    #[error("Key {0} is reserved.")]
    ReservedKey(KeyCode),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("No pins to cycle through.")]
    NoPins,

    #[error("Invalid key order: {0}")]
    InvalidKeyOrder(String),

    #[error("No combo configured for {0}.")]
    NoComboConfigured(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an error is the caller's doing or a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Unexpected,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::User => "UserError",
            ErrorKind::Unexpected => "UnexpectedError",
        }
    }
}

impl KeypinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeypinError::Combo(_)
            | KeypinError::Store(StoreError::NotFound { .. })
            | KeypinError::NoActiveTab
            | KeypinError::DuplicatePin(_)
            | KeypinError::NoFreeKey(_)
            | KeypinError::ReservedKey(_)
            | KeypinError::UnknownKey(_)
            | KeypinError::UnknownCommand(_)
            | KeypinError::InvalidArgs(_)
            | KeypinError::NoPins
            | KeypinError::InvalidKeyOrder(_)
            | KeypinError::NoComboConfigured(_) => ErrorKind::User,
            KeypinError::Store(_)
            | KeypinError::Host(_)
            | KeypinError::Serde(_)
            | KeypinError::Config(_)
            | KeypinError::Io(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            name: self.kind().name().to_string(),
            message: self.to_string(),
        }
    }
}

/// Error half of a command response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, KeypinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_user_error() {
        let err: KeypinError = StoreError::not_found(&KeyCode::new("KeyA"), &[LayerId::GLOBAL]).into();
        assert!(err.is_user_error());
        assert_eq!(
            err.payload(),
            ErrorPayload {
                name: "UserError".to_string(),
                message: "No pin for A in layer(s) 0.".to_string(),
            }
        );
    }

    #[test]
    fn test_host_failure_is_unexpected() {
        let err: KeypinError = HostError::Failed("boom".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(err.payload().name, "UnexpectedError");
    }

    #[test]
    fn test_reserved_key_message_uses_glyph() {
        let err = KeypinError::ReservedKey(KeyCode::history());
        assert_eq!(err.to_string(), "Key ⌫ is reserved.");
    }
}

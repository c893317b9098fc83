//! # Error Types
//!
//! Structured error handling for the command delivery engine.
//!
//! Every error carries a stable code (`FAILED_VALIDATION`, `NOT_FOUND`,
//! `SAVE_FAILED`, `UNSUPPORTED_MESSAGE_TYPE`, ...) so that the HTTP layer can
//! map it onto a client or server response without string matching.

use crate::fleet::FleetError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommanderError {
    #[error("FAILED_VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("SAVE_{entity}_FAILED: {} unprocessed item(s)", unprocessed_keys.len())]
    SaveFailed {
        entity: String,
        unprocessed_keys: Vec<String>,
    },
    #[error("UNSUPPORTED_MESSAGE_TYPE: status {status} with delivery method {delivery_method}")]
    UnsupportedMessageType {
        status: String,
        delivery_method: String,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Fleet service error: {0}")]
    Fleet(#[from] FleetError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Provisioning error: {0}")]
    Provisioning(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CommanderError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn save_failed(entity: impl Into<String>, unprocessed_keys: Vec<String>) -> Self {
        Self::SaveFailed {
            entity: entity.into().to_uppercase(),
            unprocessed_keys,
        }
    }

    /// Stable machine-readable code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "FAILED_VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::SaveFailed { .. } => "SAVE_FAILED",
            Self::UnsupportedMessageType { .. } => "UNSUPPORTED_MESSAGE_TYPE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Messaging(_) => "MESSAGING_ERROR",
            Self::Fleet(_) => "FLEET_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Provisioning(_) => "PROVISIONING_FAILED",
            Self::Conflict(_) => "CONFLICT",
        }
    }

    /// Whether the caller caused the error (and retrying the same input is pointless)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

impl From<serde_json::Error> for CommanderError {
    fn from(error: serde_json::Error) -> Self {
        CommanderError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for CommanderError {
    fn from(error: sqlx::Error) -> Self {
        CommanderError::Storage(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for CommanderError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        CommanderError::Configuration(error.to_string())
    }
}

pub type CommanderResult<T> = Result<T, CommanderError>;

//! Error types for offsetkv

use crate::log::LogError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Store errors. Cheap to clone so one batch failure can be handed to both
/// the caller's callback and the returned future.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // === Log Errors ===
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    // === Lifecycle Errors ===
    #[error("Store is stopped")]
    Stopped,

    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config source error: {0}")]
    Config(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let err = Error::InvalidState {
            operation: "start",
            state: "unconfigured",
        };
        assert_eq!(err.to_string(), "Invalid state: cannot start while unconfigured");
    }

    #[test]
    fn test_log_error_wrapped() {
        let err: Error = LogError::RecordTooLarge { size: 10, max: 5 }.into();
        assert_eq!(
            err.to_string(),
            "Log error: record too large: 10 > 5 bytes"
        );
    }
}

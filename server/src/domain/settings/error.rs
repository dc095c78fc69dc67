//! Settings error types

use thiserror::Error;

use super::cipher::CodecError;
use crate::data::DataError;

/// Validation failure reasons, stable for API callers
pub const REASON_UNKNOWN_KEY: &str = "unknown_key";
pub const REASON_INVALID_TYPE: &str = "invalid_type";

#[derive(Error, Debug)]
pub enum SettingsError {
    /// Bad key or value on write; nothing was changed
    #[error("Invalid setting '{field}': {reason}")]
    Validation { field: String, reason: &'static str },

    /// Backend unreachable, write failed or timed out; cache left unchanged
    #[error("Failed to persist settings: {0}")]
    Persistence(#[from] DataError),

    /// Stored payload failed decryption or could not be decoded
    #[error("Stored settings failed integrity check: {0}")]
    Integrity(#[from] CodecError),
}

impl SettingsError {
    pub fn unknown_key(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: REASON_UNKNOWN_KEY,
        }
    }

    pub fn invalid_type(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: REASON_INVALID_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        assert_eq!(
            SettingsError::unknown_key("leverage").to_string(),
            "Invalid setting 'leverage': unknown_key"
        );
        assert_eq!(
            SettingsError::invalid_type("dry_run").to_string(),
            "Invalid setting 'dry_run': invalid_type"
        );
    }

    #[test]
    fn test_persistence_from_data_error() {
        let err: SettingsError = DataError::timeout("sqlite", 5).into();
        assert!(matches!(err, SettingsError::Persistence(_)));
        assert!(err.to_string().contains("did not answer within 5s"));
    }
}

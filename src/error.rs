//! Error types shared across the build pipeline and the query surface.
//!
//! Errors are serialized as tagged JSON objects so a transport gateway can
//! forward them as clean discriminated unions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types using a discriminated union pattern.
///
/// This enum uses internally-tagged serialization (`#[serde(tag = "name")]`):
/// each variant serializes to a JSON object with a `name` field as the
/// discriminator.
///
/// Per-record conditions (decode skips, grid drift) are deliberately absent:
/// they are counters inside the build loop, not errors that cross the driver
/// boundary.
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum AppError {
    /// I/O operation failed (scratch write, store write, rename, mmap).
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Parsing or data format error in a persisted artifact.
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Invalid input or validation error.
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// No capture chunks were found at the given paths.
    #[error("No input chunks: {message}")]
    InputMissing { message: String },

    /// Stream-level decoder failure; the affected bands are rolled back.
    #[error("Fatal decode error: {message}")]
    DecodeFatal { message: String },

    /// Unknown band id on the query surface.
    #[error("Band {band_id} not found")]
    BandNotFound { band_id: usize },
}

impl AppError {
    /// Exit code for the batch command.
    ///
    /// 0 is reserved for success; anything not covered by the documented
    /// codes maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::InputMissing { .. } => 2,
            AppError::DecodeFatal { .. } => 3,
            AppError::IoError { .. } => 4,
            _ => 1,
        }
    }
}

/// Convert standard IO errors into the app error type.
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::IoError {
            message: error.to_string(),
        }
    }
}

/// Convert JSON parsing errors into the app error type.
impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::ParseError {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = AppError::IoError {
            message: "test error".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""name":"IoError"#));
        assert!(json.contains(r#""message":"test error"#));
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{"name":"BandNotFound","band_id":7}"#;
        let error: AppError = serde_json::from_str(json).unwrap();

        match error {
            AppError::BandNotFound { band_id } => assert_eq!(band_id, 7),
            _ => panic!("Wrong error variant"),
        }
    }

    #[test]
    fn test_exit_codes() {
        let missing = AppError::InputMissing {
            message: "no chunks".to_string(),
        };
        let fatal = AppError::DecodeFatal {
            message: "truncated stream".to_string(),
        };
        let io = AppError::IoError {
            message: "disk full".to_string(),
        };
        let other = AppError::BandNotFound { band_id: 0 };

        assert_eq!(missing.exit_code(), 2);
        assert_eq!(fatal.exit_code(), 3);
        assert_eq!(io.exit_code(), 4);
        assert_eq!(other.exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_error: AppError = io_error.into();

        match app_error {
            AppError::IoError { message } => {
                assert!(message.contains("file not found"));
            }
            _ => panic!("Wrong error variant"),
        }
    }
}

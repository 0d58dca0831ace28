//! Unified error handling for the fleet-tracker library.
//!
//! None of these errors is fatal to the engine. Ingestion paths drop the
//! offending record and keep going; the error only tells the caller why.

use thiserror::Error;

/// Unified error type for fleet-tracker operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    /// A location record failed validation at the ingestion boundary
    #[error("Invalid location for device '{device_id}': {reason}")]
    InvalidLocation { device_id: String, reason: String },

    /// A feed message or API body could not be decoded
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// HTTP/API error
    #[error("{}", http_message(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn http_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl FleetError {
    pub(crate) fn invalid_location(device_id: &str, reason: impl Into<String>) -> Self {
        FleetError::InvalidLocation {
            device_id: device_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from bad input rather than the environment.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidLocation { .. } | FleetError::Decode { .. }
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Decode {
            message: err.to_string(),
        }
    }
}

/// Result type alias for fleet-tracker operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Extension trait for converting Option to FleetError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an invalid location error.
    fn ok_or_invalid(self, device_id: &str, reason: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid(self, device_id: &str, reason: &str) -> Result<T> {
        self.ok_or_else(|| FleetError::invalid_location(device_id, reason))
    }
}

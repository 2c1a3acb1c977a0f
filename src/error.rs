//! Error types for the shaped-automl crate

use thiserror::Error;

/// Result type alias for shaped-automl operations
pub type Result<T> = std::result::Result<T, AutomlError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum AutomlError {
    /// Mutually exclusive switches can both resolve to true. Raised while a
    /// constraint space is being built, never at sample time.
    #[error("Configuration conflict: {0}")]
    ConfigConflict(String),

    /// An unrecognized categorical value reached a branch with no matching
    /// case. Aborts the current trial only.
    #[error("Unsupported value for '{name}': {value}")]
    UnsupportedValue { name: String, value: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Sampling error: {0}")]
    SamplingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AutomlError {
    fn from(err: serde_json::Error) -> Self {
        AutomlError::SerializationError(err.to_string())
    }
}

impl AutomlError {
    /// Shorthand for [`AutomlError::UnsupportedValue`].
    pub fn unsupported(name: impl Into<String>, value: impl ToString) -> Self {
        AutomlError::UnsupportedValue {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Shorthand for [`AutomlError::InvalidParameter`].
    pub fn invalid(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        AutomlError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AutomlError::ConfigConflict("shake-shake vs shake-drop".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration conflict: shake-shake vs shake-drop"
        );
    }

    #[test]
    fn test_unsupported_value_display() {
        let err = AutomlError::unsupported("batch_size", 123);
        assert_eq!(err.to_string(), "Unsupported value for 'batch_size': 123");
    }
}

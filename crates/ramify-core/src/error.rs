use thiserror::Error;

/// Core error types shared across the platform
#[derive(Error, Debug)]
pub enum Error {
    /// A descriptor or record failed validation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Serialization error
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Generic error
    #[error("Generic error: {message}")]
    Generic { message: String },
}

impl Error {
    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validation_error() {
        let actual = Error::validation("bad descriptor");
        match actual {
            Error::Validation { message } => assert_eq!(message, "bad descriptor"),
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn test_generic_error_display() {
        let fixture = Error::generic("boom");
        let actual = fixture.to_string();
        let expected = "Generic error: boom";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_serialization_error_from() {
        let source = serde_json::from_str::<u32>("not-a-number").unwrap_err();
        let actual = Error::from(source);
        assert!(matches!(actual, Error::Serialization { .. }));
    }
}

use thiserror::Error;

/// Misconfiguration detected while interpreting tag parameters.
///
/// These surface as template errors: authors must see them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown variable type `{0}`")]
    UnknownType(String),
    #[error("unknown variable scope `{0}`")]
    UnknownScope(String),
    #[error("unknown process stage `{0}`")]
    UnknownProcess(String),
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("parameter `{param}` must be an integer, got `{value}`")]
    InvalidInteger { param: String, value: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

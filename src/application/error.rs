use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

use crate::{application::repos::RepoError, domain::error::DomainError, infra::error::InfraError};

/// Flattened error chain for user-visible reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn render(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("cache gateway failed")]
    Repo(#[from] RepoError),
    #[error("template file `{}` not found", path.display())]
    FileNotFound { path: PathBuf },
    #[error("not authorized to {action}")]
    Unauthorized { action: &'static str },
    #[error("nested tag depth exceeded the limit of {limit}")]
    RecursionLimit { limit: usize },
    #[error("unknown stash verb `{0}`")]
    UnknownVerb(String),
    #[error("`{0}` cannot be deferred")]
    NotDeferrable(&'static str),
    #[error("template host failed: {0}")]
    Host(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Misconfiguration a template author must fix. These abort the tag's
    /// output and are never downgraded to a soft miss.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Domain(_)
                | Self::FileNotFound { .. }
                | Self::UnknownVerb(_)
                | Self::NotDeferrable(_)
                | Self::Validation(_)
                | Self::RecursionLimit { .. }
        )
    }

    /// Short message suitable for showing in place of a tag's output.
    pub fn presentation_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "You are not authorized to perform this action",
            Self::Repo(_) | Self::Infra(_) => "Cache temporarily unavailable",
            Self::Host(_) | Self::Unexpected(_) => "Unexpected error occurred",
            _ => "Template configuration error",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(AppError::from(DomainError::UnknownProcess("later".into())).is_configuration_error());
        assert!(AppError::FileNotFound { path: "x.html".into() }.is_configuration_error());
        assert!(!AppError::Unauthorized { action: "flush the cache" }.is_configuration_error());
        assert!(!AppError::from(RepoError::Timeout).is_configuration_error());
    }

    #[test]
    fn presentation_messages_hide_details() {
        let err = AppError::Unauthorized { action: "flush the cache" };
        assert_eq!(err.presentation_message(), "You are not authorized to perform this action");
        let err = AppError::from(RepoError::Timeout);
        assert_eq!(err.presentation_message(), "Cache temporarily unavailable");
    }

    #[test]
    fn report_walks_the_source_chain() {
        let err = AppError::from(RepoError::Timeout);
        let report = err.report();
        assert_eq!(report.messages, ["cache gateway failed", "database timeout"]);
        assert_eq!(report.render(), "cache gateway failed: database timeout");
    }
}

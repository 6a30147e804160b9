use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to read template file `{}`", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write static page `{}`", path.display())]
    StaticWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("signal handling failed")]
    Signal(#[source] io::Error),
    #[error("database error: {message}")]
    Database { message: String },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn template_read(path: &Path, source: io::Error) -> Self {
        Self::TemplateRead {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn static_write(path: &Path, source: io::Error) -> Self {
        Self::StaticWrite {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn io_failures_name_the_path_and_keep_the_cause() {
        let err = InfraError::static_write(
            Path::new("/var/static/1/about/index.html"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "failed to write static page `/var/static/1/about/index.html`"
        );
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("denied"));
    }
}

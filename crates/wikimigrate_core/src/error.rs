use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification used by the runner to decide whether a failure is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Storage,
    Translation,
    Resource,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Storage => "storage",
            Self::Translation => "translation",
            Self::Resource => "resource",
        }
    }

    /// Only configuration failures abort a run.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct MigrationError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn translation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Translation, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-tag an error raised by a lower layer, e.g. a storage failure during
    /// directory preparation that must abort the run.
    pub fn reclassify(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Renders the full cause chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cursor = self.source();
        while let Some(cause) = cursor {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            cursor = cause.source();
        }
        out
    }
}

/// Classify a foreign error with context, in the shape of `anyhow::Context`.
pub trait ResultExt<T> {
    fn with_kind<F, M>(self, kind: ErrorKind, message: F) -> Result<T>
    where
        F: FnOnce() -> M,
        M: Into<String>;

    fn storage_context<F, M>(self, message: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.with_kind(ErrorKind::Storage, message)
    }

    fn resource_context<F, M>(self, message: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.with_kind(ErrorKind::Resource, message)
    }
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn with_kind<F, M>(self, kind: ErrorKind, message: F) -> Result<T>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.map_err(|error| MigrationError::new(kind, message()).with_source(error))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let error = MigrationError::translation("unterminated {{{ block");
        assert_eq!(
            error.to_string(),
            "translation error: unterminated {{{ block"
        );
        assert_eq!(error.kind(), ErrorKind::Translation);
    }

    #[test]
    fn only_configuration_is_fatal() {
        assert!(ErrorKind::Configuration.is_fatal());
        assert!(!ErrorKind::Storage.is_fatal());
        assert!(!ErrorKind::Translation.is_fatal());
        assert!(!ErrorKind::Resource.is_fatal());
    }

    #[test]
    fn storage_context_keeps_io_cause_in_chain() {
        let result: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        let error = result
            .storage_context(|| "failed to read Main.txt")
            .expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Storage);
        let chain = error.chain();
        assert!(chain.contains("failed to read Main.txt"));
        assert!(chain.contains("caused by: no such file"));
    }

    #[test]
    fn reclassify_changes_kind_only() {
        let error = MigrationError::storage("cannot remove target").reclassify(ErrorKind::Configuration);
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(error.message(), "cannot remove target");
    }
}

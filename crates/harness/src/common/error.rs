//! Harness error definitions.
//!
//! Every failure a run can hit is a [`HarnessError`]. Each variant maps onto an
//! [`ErrorKind`] tag, which is what verdicts and JSON reports carry. All errors
//! are terminal for the test case that raised them.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Coarse classification of a [`HarnessError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The artifact path does not exist or is not a regular file.
    NotFound,
    /// The artifact exists but could not be read.
    NotReadable,
    /// The caller lacks the capability to insert or remove modules.
    PermissionDenied,
    /// Load requested for a module the kernel already has.
    AlreadyLoaded,
    /// Unload requested for a module the kernel does not have.
    NotLoaded,
    /// The kernel or the module tool refused the request.
    KernelRejected,
    /// An expected marker line never appeared.
    VerificationTimeout,
    /// The run was cancelled before it finished.
    Cancelled,
    /// Harness-side I/O failure (lock files, log sinks).
    Io,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    /// Returns the kind's name as reported in verdicts.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotReadable => "NotReadable",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::AlreadyLoaded => "AlreadyLoaded",
            ErrorKind::NotLoaded => "NotLoaded",
            ErrorKind::KernelRejected => "KernelRejected",
            ErrorKind::VerificationTimeout => "VerificationTimeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "Io",
            ErrorKind::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by harness components.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("module artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("module artifact not readable: {}: {reason}", path.display())]
    NotReadable { path: PathBuf, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("module `{0}` is already loaded")]
    AlreadyLoaded(String),

    #[error("module `{0}` is not loaded")]
    NotLoaded(String),

    /// `code` is the tool exit status or the errno of the failed call.
    #[error("kernel rejected request{}: {diagnostic}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    KernelRejected {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("marker {marker:?} not observed within {waited:?}")]
    VerificationTimeout { marker: String, waited: Duration },

    #[error("run cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Wraps an I/O error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::NotFound { .. } => ErrorKind::NotFound,
            HarnessError::NotReadable { .. } => ErrorKind::NotReadable,
            HarnessError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            HarnessError::AlreadyLoaded(_) => ErrorKind::AlreadyLoaded,
            HarnessError::NotLoaded(_) => ErrorKind::NotLoaded,
            HarnessError::KernelRejected { .. } => ErrorKind::KernelRejected,
            HarnessError::VerificationTimeout { .. } => ErrorKind::VerificationTimeout,
            HarnessError::Cancelled => ErrorKind::Cancelled,
            HarnessError::Io { .. } => ErrorKind::Io,
            HarnessError::Config(_) => ErrorKind::Config,
        }
    }

    /// Captured diagnostic text from the kernel or module tool, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            HarnessError::KernelRejected { diagnostic, .. } if !diagnostic.is_empty() => {
                Some(diagnostic)
            }
            HarnessError::PermissionDenied(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

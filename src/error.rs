//! Error type for the Scrip SDK

use thiserror::Error;

/// Error returned by engine operations.
///
/// Errors are reserved for local/transport failures: malformed storage, parse
/// failures, bad arguments, or a network exchange that could not be completed.
/// Expected business outcomes ("insufficient balance", etc.) are never errors;
/// they are [`Status`](crate::Status) values inside a successful result.
///
/// The `internal` flag distinguishes the two failure families:
/// - `internal == true`: a defect or unrecoverable local condition (corrupt
///   datastore, unparseable server response). Retrying will not help.
/// - `internal == false`: a transport-level failure. The caller may retry the
///   whole operation later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ScripError {
    message: String,
    internal: bool,
}

impl ScripError {
    /// An internal error: a defect or unrecoverable local condition.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal: true,
        }
    }

    /// A recoverable error: a transient transport failure the caller may retry.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal: false,
        }
    }

    /// Whether this error signals a defect rather than a transient failure.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepend context to the message, keeping the internal flag.
    pub fn context(self, context: impl AsRef<str>) -> Self {
        Self {
            message: format!("{}: {}", context.as_ref(), self.message),
            internal: self.internal,
        }
    }
}

impl From<serde_json::Error> for ScripError {
    fn from(e: serde_json::Error) -> Self {
        ScripError::internal(format!("json error: {e}"))
    }
}

impl From<std::io::Error> for ScripError {
    fn from(e: std::io::Error) -> Self {
        ScripError::internal(format!("io error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, ScripError>;

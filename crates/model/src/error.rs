use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The request was cancelled by the caller.
    Aborted,
    /// Any other errors.
    Other,
}

/// An error reported by an adapter inside the chunk stream.
///
/// Adapter failures travel as data, so the error is serializable and
/// carries an optional provider-specific code rather than a source error.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkError {
    /// A human-readable description.
    pub message: String,
    /// The provider's error code, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ChunkError {
    /// Creates an error with the given message and no code.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Sets the error code.
    #[inline]
    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Classifies the error by its code.
    pub fn kind(&self) -> ErrorKind {
        match self.code.as_deref() {
            Some("content_filter" | "moderated") => ErrorKind::Moderated,
            Some("rate_limit_exceeded" | "rate_limited" | "429") => {
                ErrorKind::RateLimitExceeded
            }
            Some("aborted" | "cancelled") => ErrorKind::Aborted,
            _ => ErrorKind::Other,
        }
    }
}

impl Display for ChunkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ChunkError {}

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::event::EventId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read state file `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("could not prepare state directory `{dir}`: {source}")]
    PrepareDir { dir: PathBuf, source: io::Error },
    #[error("could not write state temp file in `{dir}`: {source}")]
    Write { dir: PathBuf, source: io::Error },
    #[error("could not persist state file `{path}`: {source}")]
    Persist { path: PathBuf, source: io::Error },
}

/// Failure categories for calls to external collaborators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallErrorKind {
    Connectivity,
    Timeout,
    RateLimited { retry_after: Option<Duration> },
    Client,
    Guardrail,
    Cancelled,
    Other,
}

impl CallErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Client => "client",
            Self::Guardrail => "guardrail",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Connectivity, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Timeout, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::RateLimited { retry_after }, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Client, message)
    }

    pub fn guardrail(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Guardrail, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Cancelled, message)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not commit state after replying to `{event_id}`: {source}")]
    Commit { event_id: EventId, source: StoreError },
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CallError, CallErrorKind};

    #[test]
    fn call_error_display_names_the_kind() {
        let error = CallError::rate_limited(Some(Duration::from_secs(7)), "slow down");
        assert_eq!(error.to_string(), "rate_limited error: slow down");
        assert_eq!(
            error.kind,
            CallErrorKind::RateLimited { retry_after: Some(Duration::from_secs(7)) }
        );
    }
}

use thiserror::Error;

/// Failure raised by a per-game adapter call.
///
/// Adapters return this instead of panicking; the harness boundary wraps it
/// into a [`HarnessError`] together with the operation name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by a [`crate::GameHarness`] to the driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarnessError {
    /// A game-specific adapter call failed; the driver may skip the iteration.
    #[error("adapter call `{operation}` failed: {message}")]
    Adapter {
        operation: &'static str,
        message: String,
    },
    /// A game-specific adapter call panicked and was contained at the boundary.
    #[error("adapter call `{operation}` panicked: {message}")]
    Panic {
        operation: &'static str,
        message: String,
    },
    /// The harness is missing or incomplete on the host; fatal for the run.
    #[error("harness protocol violation: {0}")]
    Protocol(String),
    /// The host page or process crashed or failed to navigate.
    #[error("host failure: {0}")]
    Host(String),
    /// A payload crossing the harness boundary could not be (de)serialized.
    #[error("malformed harness payload in `{operation}`: {message}")]
    Serialization {
        operation: &'static str,
        message: String,
    },
}

impl HarnessError {
    #[must_use]
    pub fn adapter(operation: &'static str, err: &AdapterError) -> Self {
        Self::Adapter {
            operation,
            message: err.message.clone(),
        }
    }

    /// Protocol violations abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Host failures are recovered by reloading and re-attaching.
    #[must_use]
    pub const fn needs_recovery(&self) -> bool {
        matches!(self, Self::Host(_))
    }
}

/// Misuse of the single-session [`crate::Recorder`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RecorderError {
    #[error("a recording session is already open; call end() first")]
    SessionOpen,
    #[error("no recording session is open; call start() first")]
    NoSession,
}

/// Failures writing artifacts to the recordings directory.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures that end a driver run early.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("host recovery failed after {attempts} attempts: {last}")]
    RecoveryExhausted { attempts: u32, last: HarnessError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classification() {
        assert!(HarnessError::Protocol("missing".into()).is_fatal());
        assert!(!HarnessError::Host("crash".into()).is_fatal());
        assert!(HarnessError::Host("crash".into()).needs_recovery());
        let adapter = HarnessError::adapter("getVision", &AdapterError::new("boom"));
        assert!(!adapter.is_fatal());
        assert!(!adapter.needs_recovery());
        assert_eq!(
            adapter.to_string(),
            "adapter call `getVision` failed: boom"
        );
    }
}

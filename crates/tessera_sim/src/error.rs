//! Errors raised inside the simulated engine.

use thiserror::Error;

/// Result type of engine operations.
pub type SimResult<T> = Result<T, SimError>;

/// An engine failure, reported to callers as a status code plus a message on
/// the context (or on an out-parameter error object).
#[derive(Debug, Error)]
pub enum SimError {
    /// A required pointer argument was null.
    #[error("null pointer passed for {0}")]
    Null(&'static str),

    /// The pointer does not name a live object of the expected kind.
    #[error("invalid {kind} handle")]
    InvalidHandle {
        /// Expected kind.
        kind: &'static str,
    },

    /// The object was already freed.
    #[error("{kind} used after free")]
    UseAfterFree {
        /// Kind of the freed object.
        kind: &'static str,
    },

    /// An argument was rejected.
    #[error("{0}")]
    Invalid(String),

    /// The object is in the wrong state for the call.
    #[error("{0}")]
    State(String),

    /// Allocation refused through `sim.fail_alloc`.
    #[error("simulated allocation failure for {0}")]
    AllocFailed(&'static str),

    /// Filesystem error of the VFS.
    #[error("{context}: {source}")]
    Io {
        /// What was attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(SimError::Null("out").to_string(), "null pointer passed for out");
        assert_eq!(
            SimError::InvalidHandle { kind: "array" }.to_string(),
            "invalid array handle"
        );
        let err = SimError::io("open 'x'", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.to_string().starts_with("open 'x': "));
    }
}

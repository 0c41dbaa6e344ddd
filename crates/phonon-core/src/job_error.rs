//! Job handling error types
//!
//! Queue consumers return a [`JobError`] when a message could not be handled.
//! The error tells the queue whether the message may be delivered again
//! (transient) or must be dropped (permanent). Whether a transient failure is
//! actually redelivered is the queue's policy, not the handler's.

use std::fmt;

/// Failure of a single queued job
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    transient: bool,
}

impl JobError {
    /// A failure that can never succeed on redelivery, such as a payload that
    /// does not decode.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            transient: false,
        }
    }

    /// A failure caused by a dependency that may recover (storage, database,
    /// converter subprocess).
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Untyped failures are treated as transient
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err)
    }
}

/// Extension trait to mark a result's error as permanent
pub trait JobResultExt<T> {
    fn permanent(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn permanent(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::permanent(e.into()))
    }
}

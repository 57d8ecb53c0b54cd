use std::path::PathBuf;

use thiserror::Error;

/// Core error type for the scheduler.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("entity store error: {0}")]
    Store(#[from] StoreError),
    #[error("execution queue error: {0}")]
    Queue(anyhow::Error),
    #[error("broker error: {0}")]
    Broker(anyhow::Error),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Errors raised by the entity store adapter. CAS conflicts are never
/// surfaced here — `modify` absorbs them internally by retrying.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no entity found for key {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Outcome of handling a single inbound event, as seen by the broker binding
/// deciding whether to ack, nack-and-redeliver, or drop the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Handler completed, including idempotent no-op replays. Ack.
    Ack,
    /// Transient failure (store/queue/broker unavailable). Nack and redeliver.
    Nack,
    /// Protocol violation or precondition failure that redelivery cannot
    /// fix. Logged and acked to avoid a poison-message redelivery loop.
    Fatal(String),
}

/// Error type returned by progression-engine handlers, convertible into a
/// [`HandlerOutcome`] at the dispatch boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl HandlerError {
    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self::Transient(source.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => HandlerError::Protocol(format!("not found: {key}")),
            StoreError::Backend(source) => HandlerError::Transient(source),
        }
    }
}

impl From<HandlerError> for HandlerOutcome {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Transient(_) => HandlerOutcome::Nack,
            HandlerError::Protocol(message) => HandlerOutcome::Fatal(message),
        }
    }
}

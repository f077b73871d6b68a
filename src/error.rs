use thiserror::Error;

use crate::models::channel::ChannelType;

/// Failures surfaced by the configuration store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("configuration store unavailable: {0}")]
    Backend(String),

    #[error("invalid data in configuration store: {0}")]
    InvalidData(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Event-level failures. Anything here aborts the event before a task is published.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("failed to resolve enabled channels: {0}")]
    ResolutionFailure(String),
}

impl From<StoreError> for RoutingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => RoutingError::NotFound { entity, id },
            other => RoutingError::ResolutionFailure(other.to_string()),
        }
    }
}

/// Single-channel publish failures. Never escalated to the event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no broker handle configured for {0}")]
    NotConfigured(String),

    #[error("broker rejected or unreachable: {0}")]
    PublishFailure(String),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<lapin::Error> for DispatchError {
    fn from(err: lapin::Error) -> Self {
        DispatchError::PublishFailure(err.to_string())
    }
}

/// Per-channel outcome of one routing pass.
#[derive(Debug, Error)]
pub enum ChannelSkip {
    #[error("no worker registered for channel {0}")]
    RegistryMiss(ChannelType),

    #[error("channel {0} blocked for this account or integration disabled")]
    Gated(ChannelType),

    #[error("publish to {channel} failed: {source}")]
    Publish {
        channel: ChannelType,
        #[source]
        source: DispatchError,
    },
}

/// Adapter-level failure, contained inside the channel worker.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no delivery adapter for channel {0}")]
    Unsupported(ChannelType),

    #[error("invalid delivery target: {0}")]
    InvalidTarget(String),

    #[error("delivery request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected delivery with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum TaskDecodeError {
    #[error("malformed task envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("expected {expected} args, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("arg {position} ({name}) has type {actual}, expected {expected}")]
    ArgType {
        position: usize,
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("arg {position} is not valid base64: {reason}")]
    Bytes { position: usize, reason: String },

    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("invalid event data: {0}")]
    Data(String),

    #[error("task '{0}' is not handled by this worker")]
    UnexpectedTask(String),
}

/// Why a consumed task did not complete; drives the worker's retry decision.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Decode(#[from] TaskDecodeError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("delivery failed for every target: {0}")]
    Delivery(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    /// Decode failures and unknown tenants/accounts are permanent for the same task bytes.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TaskError::Decode(_) | TaskError::Routing(RoutingError::NotFound { .. })
        )
    }
}

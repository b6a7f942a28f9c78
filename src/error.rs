use crate::aggregate::AggregateError;
use crate::trade::TransitionError;

/// Failures raised by the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode {kind} record: {message}")]
    Encode { kind: &'static str, message: String },
    #[error("failed to decode {kind} record: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: minicbor::decode::Error,
    },
    #[error("failed to mint identifier: {0}")]
    Identifier(String),
}

/// Caller-facing error taxonomy of the trading services.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// Malformed or missing input, the message is shown to the caller as is.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    /// A state machine precondition failed, e.g. the trade is no longer pending.
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid credentials.")]
    InvalidCredentials,
    #[error("password digest failed: {0}")]
    Digest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aggregation(#[from] AggregateError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Persistence, aggregation and hashing failures are never shown verbatim.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Aggregation(_) | Self::Digest(_))
    }
}

impl From<TransitionError> for ServiceError {
    fn from(value: TransitionError) -> Self {
        Self::Conflict(value.to_string())
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

//! Remote system of record: client trait and shared types.

mod http;

pub use http::HttpRemoteClient;

use thiserror::Error;

use crate::models::{Entity, Record, ServerId};

/// A record as the remote system returns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord<T> {
    pub server_id: ServerId,
    pub fields: T,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No connectivity, timeout, or a temporarily unavailable server
    #[error("Remote unreachable: {0}")]
    Network(String),
    /// The remote refused the request (validation or authorization)
    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Remote record not found: {0}")]
    NotFound(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Whether the same request may succeed later without local changes
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// HTTP-ish status to record when this error rejects a push
    pub const fn status(&self) -> u16 {
        match self {
            Self::Rejected { status, .. } => *status,
            Self::NotFound(_) => 404,
            Self::Network(_) => 503,
            Self::InvalidPayload(_) => 502,
            Self::InvalidConfiguration(_) => 0,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<RemoteError> for crate::Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(message) => Self::Network(message),
            RemoteError::Rejected { status, message } => Self::Rejected { status, message },
            RemoteError::NotFound(id) => Self::NotFound(id),
            RemoteError::InvalidPayload(message) => Self::Rejected {
                status: 502,
                message,
            },
            RemoteError::InvalidConfiguration(message) => Self::InvalidInput(message),
        }
    }
}

/// Request/response access to the remote API for one entity type (async)
#[allow(async_fn_in_trait)]
pub trait RemoteClient<T: Entity> {
    /// One page of records matching `term`
    async fn search(&self, term: &str) -> RemoteResult<Vec<RemoteRecord<T>>>;

    /// Create the record remotely when it has no server id, otherwise update it
    async fn push(&self, record: &Record<T>) -> RemoteResult<RemoteRecord<T>>;

    /// Fetch a single record by its server id
    async fn fetch_by_id(&self, server_id: &ServerId) -> RemoteResult<RemoteRecord<T>>;
}

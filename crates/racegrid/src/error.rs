use crate::types::{ReplicaAddress, ServiceKind, TrackId};

/// Errors that can occur anywhere in the racing grid.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("no live {kind} replica available")]
    ServiceUnavailable { kind: ServiceKind },

    #[error("replica unavailable: {address}")]
    ReplicaUnavailable {
        address: ReplicaAddress,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("registration rejected: {reason}")]
    Registration { reason: String },

    #[error("persistence error: {reason}")]
    PersistenceError {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("track {track_id} is full")]
    TrackFull { track_id: TrackId },

    #[error("{username} is already racing with motorcycle {motorcycle_id}")]
    AlreadyRacing {
        username: String,
        motorcycle_id: i32,
    },

    #[error("{username} cannot afford {price} (balance {balance})")]
    InsufficientFunds {
        username: String,
        price: i64,
        balance: i64,
    },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {}", .source.message())]
    Rpc {
        operation: &'static str,
        #[source]
        source: tonic::Status,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl GridError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// True for a missing record, whether reported locally or by a replica.
    pub fn is_not_found(&self) -> bool {
        match self {
            GridError::NotFound { .. } => true,
            GridError::Rpc { source, .. } => source.code() == tonic::Code::NotFound,
            _ => false,
        }
    }
}

impl From<GridError> for tonic::Status {
    fn from(err: GridError) -> Self {
        let message = err.to_string();
        match err {
            GridError::ServiceUnavailable { .. } | GridError::ReplicaUnavailable { .. } => {
                tonic::Status::unavailable(message)
            }
            GridError::InvalidArgument { .. } => tonic::Status::invalid_argument(message),
            GridError::NotFound { .. } => tonic::Status::not_found(message),
            GridError::AlreadyRacing { .. } => tonic::Status::already_exists(message),
            GridError::TrackFull { .. } | GridError::InsufficientFunds { .. } => {
                tonic::Status::failed_precondition(message)
            }
            GridError::Timeout { .. } => tonic::Status::deadline_exceeded(message),
            GridError::Registration { .. } => tonic::Status::unavailable(message),
            // Keep the remote code when relaying a downstream failure.
            GridError::Rpc { source, .. } => tonic::Status::new(source.code(), message),
            GridError::PersistenceError { .. } | GridError::InvalidConfig { .. } => {
                tonic::Status::internal(message)
            }
        }
    }
}

//! The router's error taxonomy (§7).
//!
//! One variant per error category named in the spec. This is a plain enum in
//! the style of the teacher crate's `AutomotiveError` rather than a
//! `thiserror`-derived type, since nothing here needs source-error chaining
//! beyond what `Display`/`Error` already give us.

use std::fmt;

use crate::status::{Status, StatusCode};

/// Errors surfaced by the transport, endpoint, and router layers.
#[derive(Debug, Clone)]
pub enum RouterError {
    /// Malformed request payload, missing required header, shape mismatch.
    InvalidArgument(String),
    /// Unknown service/method, unknown target client, unknown correlation id.
    NotFound(String),
    /// A pending request's deadline elapsed before a response arrived.
    DeadlineExceeded(String),
    /// Transport closed, or the peer departed mid-operation.
    Unavailable(String),
    /// Frame too large, or an outbound queue stayed full past the caller's deadline.
    ResourceExhausted(String),
    /// Send attempted on an end-streamed side, or the request shape didn't
    /// match the method's registered shape.
    FailedPrecondition(String),
    /// Handler panicked, or the parser reached an unexpected state.
    Internal(String),
    /// The caller closed its side first.
    Cancelled(String),
    /// The frame parser encountered structurally invalid bytes.
    DataLoss(String),
    /// No handler registered for the inbound method path.
    Unimplemented(String),
}

impl RouterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::InvalidArgument(_) => StatusCode::InvalidArgument,
            RouterError::NotFound(_) => StatusCode::NotFound,
            RouterError::DeadlineExceeded(_) => StatusCode::DeadlineExceeded,
            RouterError::Unavailable(_) => StatusCode::Unavailable,
            RouterError::ResourceExhausted(_) => StatusCode::ResourceExhausted,
            RouterError::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            RouterError::Internal(_) => StatusCode::Internal,
            RouterError::Cancelled(_) => StatusCode::Cancelled,
            RouterError::DataLoss(_) => StatusCode::DataLoss,
            RouterError::Unimplemented(_) => StatusCode::Unimplemented,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RouterError::InvalidArgument(m)
            | RouterError::NotFound(m)
            | RouterError::DeadlineExceeded(m)
            | RouterError::Unavailable(m)
            | RouterError::ResourceExhausted(m)
            | RouterError::FailedPrecondition(m)
            | RouterError::Internal(m)
            | RouterError::Cancelled(m)
            | RouterError::DataLoss(m)
            | RouterError::Unimplemented(m) => m,
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status_code(), self.message())
    }
}

impl std::error::Error for RouterError {}

impl From<RouterError> for Status {
    fn from(err: RouterError) -> Self {
        Status::new(err.status_code(), err.message().to_string())
    }
}

impl From<&RouterError> for Status {
    fn from(err: &RouterError) -> Self {
        Status::new(err.status_code(), err.message().to_string())
    }
}

/// Inverse of the conversion above, for the transport layer surfacing a
/// peer- or connection-originated `Status` (e.g. a stream's `Closed` event)
/// as the error type the interaction drivers propagate internally.
impl From<Status> for RouterError {
    fn from(status: Status) -> Self {
        let message = status.message.clone();
        match status.code {
            StatusCode::InvalidArgument => RouterError::InvalidArgument(message),
            StatusCode::NotFound => RouterError::NotFound(message),
            StatusCode::DeadlineExceeded => RouterError::DeadlineExceeded(message),
            StatusCode::ResourceExhausted => RouterError::ResourceExhausted(message),
            StatusCode::FailedPrecondition => RouterError::FailedPrecondition(message),
            StatusCode::Cancelled => RouterError::Cancelled(message),
            StatusCode::DataLoss => RouterError::DataLoss(message),
            StatusCode::Unimplemented => RouterError::Unimplemented(message),
            StatusCode::Unavailable | StatusCode::Ok | StatusCode::Unknown => {
                RouterError::Unavailable(message)
            }
            StatusCode::AlreadyExists
            | StatusCode::PermissionDenied
            | StatusCode::Aborted
            | StatusCode::OutOfRange
            | StatusCode::Internal
            | StatusCode::Unauthenticated => RouterError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_the_matching_status_code() {
        let err = RouterError::NotFound("client-7".into());
        let status: Status = err.into();
        assert_eq!(status.code, StatusCode::NotFound);
        assert_eq!(status.message, "client-7");
    }
}

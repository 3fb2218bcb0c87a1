//! Error taxonomy for the HTTP surface and the feedback bridge.

use axum::http::StatusCode;
use thiserror::Error;

use crate::protocol::JsonRpcError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed body, or a session-less request that is not an initialize.
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// A session id was supplied but no live transport is registered for it.
    #[error("Session not found")]
    SessionNotFound,

    /// Defensive: unreachable while session ids are server-generated UUIDs.
    #[error("Duplicate session: {0}")]
    DuplicateSession(String),

    /// No human response arrived within the configured window.
    #[error("Request timeout - no user response received")]
    Timeout,

    /// An external actor cancelled the pending request.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::SessionNotFound => StatusCode::NOT_FOUND,
            ServerError::DuplicateSession(_)
            | ServerError::Timeout
            | ServerError::Cancelled(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            ServerError::BadRequest(msg) => JsonRpcError::bad_request(msg.clone()),
            ServerError::SessionNotFound => JsonRpcError::session_not_found(),
            ServerError::DuplicateSession(_)
            | ServerError::Timeout
            | ServerError::Cancelled(_)
            | ServerError::Internal(_) => JsonRpcError::internal_error(self.to_string()),
        }
    }
}

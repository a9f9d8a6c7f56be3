//! Error taxonomy shared by the store, the credential lifecycle and the gateway.
//!
//! Every variant maps to exactly one HTTP status. Server-side failures are
//! logged when they are turned into a response; client errors are not.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Missing or malformed request fields.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Bad credentials, bad session token or a rejected listener handshake.
    #[error("unauthorized: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate signup.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Backing store I/O failure.
    #[error("store error: {0}")]
    Store(String),
    /// A stored record (or an outbound envelope) could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A blocking task (password hashing) panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Store(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(msg) => tracing::error!(error = %msg, "Credential store failure"),
            Self::Serialization(e) => {
                tracing::error!(error = %e, "Stored record is corrupt, possible data corruption");
            }
            Self::Internal(msg) => tracing::error!(error = %msg, "Internal failure"),
            _ => tracing::debug!(error = %self, "Request rejected"),
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

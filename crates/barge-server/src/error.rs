//! Server error type and its HTTP mapping.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use barge_git::GitError;
use barge_protocol::ProtocolError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("repository already exists: {0}")]
    RepoExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request timed out")]
    Timeout,

    #[error("git error: {0}")]
    Git(GitError),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("storage error: {0}")]
    Store(#[from] barge_store::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GitError> for ServerError {
    fn from(err: GitError) -> Self {
        match err {
            e if e.is_not_found() => ServerError::NotFound(e.to_string()),
            // Framing errors mean the client sent a broken request.
            e @ (GitError::BadLength(_)
            | GitError::ShortBuffer { .. }
            | GitError::PayloadTooLarge(_)) => ServerError::BadRequest(e.to_string()),
            e => ServerError::Git(e),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Malformed(msg) => ServerError::BadRequest(msg),
            ProtocolError::UnknownService(svc) => {
                ServerError::BadRequest(format!("unknown service: {}", svc))
            }
            ProtocolError::Git(git) => git.into(),
            other => ServerError::Protocol(other),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Unauthorized = self {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"Git\"")],
                Json(ErrorBody {
                    error: "authentication required".to_string(),
                }),
            )
                .into_response();
        }

        let (status, message) = match &self {
            ServerError::RepoNotFound(_) | ServerError::NotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::RepoExists(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            ServerError::Unauthorized => unreachable!("handled above"),
            ServerError::Git(e) => {
                tracing::error!(error = %e, "internal git error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ServerError::Protocol(e) => {
                tracing::error!(error = %e, "internal protocol error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ServerError::Store(e) => {
                tracing::error!(error = %e, "internal storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

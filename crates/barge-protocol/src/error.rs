//! Protocol engine error types.

use thiserror::Error;

/// Errors that can occur while serving the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The request stream is not a valid protocol message.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The client asked for a v2 command we do not implement.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The requested service name is not a git service.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Error from the git layer.
    #[error(transparent)]
    Git(#[from] barge_git::GitError),
}

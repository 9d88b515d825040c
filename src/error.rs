//! Error types for the MeshCSE engine

use thiserror::Error;

use crate::primitive::StatusCode;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling a request primitive.
///
/// Every variant maps to a protocol status code via [`Error::status_code`];
/// the dispatcher converts errors into response primitives at its boundary,
/// so nothing here ever crosses the engine's public entry point.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed primitive, missing mandatory parameter, or handler failure
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unresolvable address, missing parent, or empty virtual view
    #[error("not found: {0}")]
    NotFound(String),

    /// Structurally forbidden operation on a resource or virtual kind
    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// Negative access decision without a collaborator-supplied status
    #[error("originator has no privilege: {0}")]
    NoPrivilege(String),

    /// Negative access decision carrying the decider's own status, returned
    /// to the caller unchanged
    #[error("access denied: {1}")]
    Denied(StatusCode, String),

    /// Parent/child resource type incompatibility
    #[error("invalid child resource type: {0}")]
    InvalidChildType(String),

    /// Subscription created under a non-subscribable parent
    #[error("target not subscribable: {0}")]
    TargetNotSubscribable(String),

    /// Content larger than the owner's byte bound at creation time
    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    /// Duplicate stable identifier or resource name
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Feature acknowledged but not served by this node
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Request forwarding to a federated peer failed
    #[error("forwarding failed: {0}")]
    Forwarding(String),

    /// Outbound HTTP transport error
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Protocol status code this error surfaces as.
    ///
    /// Transport and forwarding failures are server-side errors; every other
    /// local failure is downgraded to a client-visible category, with
    /// `BadRequest` as the catch-all for unexpected handler errors.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BadRequest,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::OperationNotAllowed(_) => StatusCode::OperationNotAllowed,
            Error::NoPrivilege(_) => StatusCode::NoPrivilege,
            Error::Denied(status, _) => *status,
            Error::InvalidChildType(_) => StatusCode::InvalidChildType,
            Error::TargetNotSubscribable(_) => StatusCode::TargetNotSubscribable,
            Error::NotAcceptable(_) => StatusCode::NotAcceptable,
            Error::AlreadyExists(_) => StatusCode::AlreadyExists,
            Error::NotImplemented(_) => StatusCode::NotImplemented,
            Error::Forwarding(_) | Error::Http(_) => StatusCode::InternalServerError,
            Error::Io(_) | Error::Internal(_) => StatusCode::BadRequest,
        }
    }
}

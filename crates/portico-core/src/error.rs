// crates/portico-core/src/error.rs
//
// Error taxonomy for calls and credential validation.

use thiserror::Error;

/// Reasons a call's credential was refused.
///
/// Every variant maps to a single unauthenticated outcome at the transport
/// boundary; the variant itself travels alongside as a tag so callers can
/// still tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `authorization` header, or one that is present but empty.
    #[error("missing \"authorization\" header")]
    MissingCredential,

    /// The header's scheme prefix is not the one the route expects.
    #[error("{0}")]
    SchemeMismatch(String),

    /// The scheme matched but its payload could not be decoded.
    #[error("{0}")]
    MalformedCredential(String),

    /// The credential decoded cleanly but does not match the policy.
    #[error("{0}")]
    InvalidCredential(String),
}

impl AuthError {
    /// Stable machine-readable tag for this error kind.
    pub fn tag(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::SchemeMismatch(_) => "scheme_mismatch",
            AuthError::MalformedCredential(_) => "malformed_credential",
            AuthError::InvalidCredential(_) => "invalid_credential",
        }
    }

    /// Rebuild an auth error from its tag and human-readable message.
    ///
    /// Returns `None` for unknown tags.
    pub fn from_tag(tag: &str, message: &str) -> Option<Self> {
        match tag {
            "missing_credential" => Some(AuthError::MissingCredential),
            "scheme_mismatch" => Some(AuthError::SchemeMismatch(message.to_string())),
            "malformed_credential" => Some(AuthError::MalformedCredential(message.to_string())),
            "invalid_credential" => Some(AuthError::InvalidCredential(message.to_string())),
            _ => None,
        }
    }
}

/// Discriminant of an [`RpcError`], used where only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    DeadlineExceeded,
    Cancelled,
    Unimplemented,
    Unavailable,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    /// Snake-case name used in JSON error bodies and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Call-level error taxonomy shared by the core, the chain, and the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Credential missing or refused.
    #[error("{0}")]
    Unauthenticated(#[from] AuthError),

    /// Malformed request fields.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call's deadline passed before it completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled by its caller.
    #[error("call cancelled")]
    Cancelled,

    /// Unknown method or unhandled call shape.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The transport could not reach the service.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A configured resource limit was hit.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unexpected fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            RpcError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RpcError::NotFound(_) => ErrorKind::NotFound,
            RpcError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            RpcError::Cancelled => ErrorKind::Cancelled,
            RpcError::Unimplemented(_) => ErrorKind::Unimplemented,
            RpcError::Unavailable(_) => ErrorKind::Unavailable,
            RpcError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            RpcError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The auth error carried by an unauthenticated outcome, if any.
    pub fn auth(&self) -> Option<&AuthError> {
        match self {
            RpcError::Unauthenticated(auth) => Some(auth),
            _ => None,
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            RpcError::Unauthenticated(auth) => auth.to_string(),
            RpcError::InvalidArgument(m)
            | RpcError::NotFound(m)
            | RpcError::Unimplemented(m)
            | RpcError::Unavailable(m)
            | RpcError::ResourceExhausted(m)
            | RpcError::Internal(m) => m.clone(),
            RpcError::DeadlineExceeded => "deadline exceeded".to_string(),
            RpcError::Cancelled => "call cancelled".to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Internal(format!("serialization error: {}", e))
    }
}

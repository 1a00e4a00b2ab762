// crates/portico-rpc/src/convert.rs
//
// Conversions between core types and tonic's wire types.
//
// The auth error kind rides in the `x-portico-auth-error` trailer so that a
// client can rebuild the exact `AuthError` from an `Unauthenticated` status.

use std::time::Duration;

use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tonic::{Code, Status};

use portico_core::error::{AuthError, ErrorKind, RpcError};
use portico_core::metadata::{self, Metadata, AUTH_ERROR, GRPC_TIMEOUT};

/// Transport headers that never become call metadata.
const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "te",
    "user-agent",
    "grpc-timeout",
    "grpc-encoding",
    "grpc-accept-encoding",
];

/// gRPC status code for an error kind.
pub fn grpc_code(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::Unauthenticated => Code::Unauthenticated,
        ErrorKind::InvalidArgument => Code::InvalidArgument,
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
        ErrorKind::Cancelled => Code::Cancelled,
        ErrorKind::Unimplemented => Code::Unimplemented,
        ErrorKind::Unavailable => Code::Unavailable,
        ErrorKind::ResourceExhausted => Code::ResourceExhausted,
        ErrorKind::Internal => Code::Internal,
    }
}

/// Convert an error into the status sent to a native client.
pub fn into_status(err: RpcError) -> Status {
    let code = grpc_code(err.kind());
    let message = err.message();
    match err.auth() {
        Some(auth) => {
            let mut trailers = MetadataMap::new();
            trailers.insert(AUTH_ERROR, MetadataValue::from_static(auth.tag()));
            Status::with_metadata(code, message, trailers)
        }
        None => Status::new(code, message),
    }
}

/// Rebuild an error from a status received over the wire.
pub fn from_status(status: &Status) -> RpcError {
    let message = status.message().to_string();
    match status.code() {
        Code::Unauthenticated => {
            let auth = status
                .metadata()
                .get(AUTH_ERROR)
                .and_then(|value| value.to_str().ok())
                .and_then(|tag| AuthError::from_tag(tag, &message))
                .unwrap_or(AuthError::InvalidCredential(message));
            RpcError::Unauthenticated(auth)
        }
        Code::InvalidArgument => RpcError::InvalidArgument(message),
        Code::NotFound => RpcError::NotFound(message),
        Code::DeadlineExceeded => RpcError::DeadlineExceeded,
        Code::Cancelled => RpcError::Cancelled,
        Code::Unimplemented => RpcError::Unimplemented(message),
        Code::Unavailable => RpcError::Unavailable(message),
        Code::ResourceExhausted => RpcError::ResourceExhausted(message),
        _ => RpcError::Internal(message),
    }
}

/// Copy ASCII metadata from an inbound tonic request. Binary values and
/// transport headers are skipped.
pub fn metadata_from_tonic(map: &MetadataMap) -> Metadata {
    let mut metadata = Metadata::new();
    for entry in map.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            if RESERVED_HEADERS.contains(&key.as_str()) {
                continue;
            }
            if let Ok(text) = value.to_str() {
                metadata.append(key.as_str(), text);
            }
        }
    }
    metadata
}

/// Copy call metadata onto an outbound tonic request.
///
/// Keys or values that are not valid ASCII metadata are dropped with a
/// debug log; the deadline travels separately via `set_timeout`.
pub fn metadata_into_tonic(metadata: &Metadata, map: &mut MetadataMap) {
    for (key, value) in metadata.iter() {
        if key == GRPC_TIMEOUT {
            continue;
        }
        let Ok(name) = MetadataKey::<Ascii>::from_bytes(key.as_bytes()) else {
            tracing::debug!("Dropping metadata with invalid key {:?}", key);
            continue;
        };
        let Ok(value) = MetadataValue::<Ascii>::try_from(value) else {
            tracing::debug!("Dropping metadata {} with invalid value", key);
            continue;
        };
        map.append(name, value);
    }
}

/// Read the `grpc-timeout` header of an inbound request.
pub fn timeout_from_tonic(map: &MetadataMap) -> Option<Duration> {
    map.get(GRPC_TIMEOUT)
        .and_then(|value| value.to_str().ok())
        .and_then(metadata::parse_grpc_timeout)
}

// crates/portico-core/src/call.rs
//
// The call model: one RPC invocation as seen by stages and handlers.

use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::credential::Identity;
use crate::error::RpcError;
use crate::metadata::Metadata;

/// A boxed stream of JSON messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Value, RpcError>> + Send + 'static>>;

/// Streaming shape of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl CallShape {
    /// Whether the client side sends a stream of messages.
    pub fn client_streams(&self) -> bool {
        matches!(self, CallShape::ClientStreaming | CallShape::Bidirectional)
    }

    /// Whether the server side replies with a stream of messages.
    pub fn server_streams(&self) -> bool {
        matches!(self, CallShape::ServerStreaming | CallShape::Bidirectional)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server_streaming",
            CallShape::ClientStreaming => "client_streaming",
            CallShape::Bidirectional => "bidirectional",
        }
    }
}

impl std::fmt::Display for CallShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload of a call.
pub enum Input {
    Unary(Value),
    Stream(MessageStream),
}

impl Input {
    /// Take a single message, failing if the input is a stream.
    pub fn into_unary(self) -> Result<Value, RpcError> {
        match self {
            Input::Unary(value) => Ok(value),
            Input::Stream(_) => Err(RpcError::Internal(
                "expected a single request message, got a stream".to_string(),
            )),
        }
    }

    /// Take the input as a stream; a single message becomes a one-item stream.
    pub fn into_stream(self) -> MessageStream {
        match self {
            Input::Unary(value) => stream_from_iter(vec![value]),
            Input::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            Input::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Response payload of a call.
pub enum Reply {
    Unary(Value),
    Stream(MessageStream),
}

impl Reply {
    pub fn into_unary(self) -> Result<Value, RpcError> {
        match self {
            Reply::Unary(value) => Ok(value),
            Reply::Stream(_) => Err(RpcError::Internal(
                "expected a single response message, got a stream".to_string(),
            )),
        }
    }

    pub fn into_stream(self) -> MessageStream {
        match self {
            Reply::Unary(value) => stream_from_iter(vec![value]),
            Reply::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A single RPC invocation.
///
/// Stages may read and rewrite any field before passing the call on; the
/// terminal invoker sees whatever the last stage forwarded.
pub struct Call {
    /// Fully qualified method path, e.g. `/portico.echo.Echo/UnaryEcho`.
    pub method: String,
    pub shape: CallShape,
    pub input: Input,
    pub metadata: Metadata,
    /// Absolute deadline, if the caller set one.
    pub deadline: Option<Instant>,
    /// Cancelled when the caller abandons the call.
    pub cancel: CancellationToken,
    /// Established by the server auth stage.
    pub identity: Option<Identity>,
}

impl Call {
    fn new(method: impl Into<String>, shape: CallShape, input: Input) -> Self {
        Self {
            method: method.into(),
            shape,
            input,
            metadata: Metadata::new(),
            deadline: None,
            cancel: CancellationToken::new(),
            identity: None,
        }
    }

    pub fn unary(method: impl Into<String>, request: Value) -> Self {
        Self::new(method, CallShape::Unary, Input::Unary(request))
    }

    pub fn server_streaming(method: impl Into<String>, request: Value) -> Self {
        Self::new(method, CallShape::ServerStreaming, Input::Unary(request))
    }

    pub fn client_streaming(method: impl Into<String>, requests: MessageStream) -> Self {
        Self::new(method, CallShape::ClientStreaming, Input::Stream(requests))
    }

    pub fn bidirectional(method: impl Into<String>, requests: MessageStream) -> Self {
        Self::new(method, CallShape::Bidirectional, Input::Stream(requests))
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("input", &self.input)
            .field("metadata_keys", &self.metadata.len())
            .field("deadline", &self.deadline)
            .field("identity", &self.identity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stream helpers
// ---------------------------------------------------------------------------

/// Build a message stream from already-materialized values.
pub fn stream_from_iter(values: Vec<Value>) -> MessageStream {
    Box::pin(tokio_stream::iter(values.into_iter().map(Ok)))
}

/// Drain a message stream into a vector, stopping at the first error.
///
/// When `limit` is set, more than `limit` messages is `ResourceExhausted`.
pub async fn collect_stream(
    mut stream: MessageStream,
    limit: Option<usize>,
) -> Result<Vec<Value>, RpcError> {
    let mut values = Vec::new();
    while let Some(item) = stream.next().await {
        let value = item?;
        if let Some(max) = limit {
            if values.len() >= max {
                return Err(RpcError::ResourceExhausted(format!(
                    "stream exceeded {} messages",
                    max
                )));
            }
        }
        values.push(value);
    }
    Ok(values)
}

// crates/portico-rpc/src/registry.rs
//
// Service registry: maps method paths to typed handlers.
//
// Handlers are registered with concrete request/response types and erased
// to JSON-in/JSON-out closures, one variant per call shape. Decoding a
// request that does not fit the handler's type is `InvalidArgument`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use portico_core::call::{CallShape, MessageStream};
use portico_core::chain::BoxFuture;
use portico_core::credential::Identity;
use portico_core::error::RpcError;
use portico_core::metadata::Metadata;

/// What a handler knows about the call it serves.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub method: String,
    pub metadata: Metadata,
    pub identity: Option<Identity>,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

type UnaryFn = Arc<dyn Fn(HandlerContext, Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;
type ServerStreamingFn =
    Arc<dyn Fn(HandlerContext, Value, ResponseSender) -> BoxFuture<'static, Result<(), RpcError>> + Send + Sync>;
type ClientStreamingFn =
    Arc<dyn Fn(HandlerContext, RequestStream) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;
type BidirectionalFn = Arc<
    dyn Fn(HandlerContext, RequestStream, ResponseSender) -> BoxFuture<'static, Result<(), RpcError>>
        + Send
        + Sync,
>;

/// A type-erased handler for one method.
#[derive(Clone)]
pub enum MethodHandler {
    Unary(UnaryFn),
    ServerStreaming(ServerStreamingFn),
    ClientStreaming(ClientStreamingFn),
    Bidirectional(BidirectionalFn),
}

impl MethodHandler {
    pub fn shape(&self) -> CallShape {
        match self {
            MethodHandler::Unary(_) => CallShape::Unary,
            MethodHandler::ServerStreaming(_) => CallShape::ServerStreaming,
            MethodHandler::ClientStreaming(_) => CallShape::ClientStreaming,
            MethodHandler::Bidirectional(_) => CallShape::Bidirectional,
        }
    }
}

impl std::fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodHandler({})", self.shape())
    }
}

// ---------------------------------------------------------------------------
// Streams handed to handlers
// ---------------------------------------------------------------------------

/// Inbound request messages of a client-streaming or bidirectional call.
pub struct RequestStream {
    inner: MessageStream,
}

impl RequestStream {
    pub fn new(inner: MessageStream) -> Self {
        Self { inner }
    }

    /// Next request message, or `None` once the client finished sending.
    pub async fn message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, RpcError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(value)) => decode_request(value).map(Some),
        }
    }
}

/// Outbound half of a server-streaming or bidirectional call.
#[derive(Debug, Clone)]
pub struct ResponseSender {
    tx: mpsc::Sender<Result<Value, RpcError>>,
}

impl ResponseSender {
    /// Send one response message; fails with `Cancelled` once the receiver
    /// has gone away.
    pub async fn send<T: Serialize>(&self, message: T) -> Result<(), RpcError> {
        let value = encode_response(message)?;
        self.tx.send(Ok(value)).await.map_err(|_| RpcError::Cancelled)
    }

    /// Terminate the stream with an error.
    pub(crate) async fn fail(&self, err: RpcError) {
        // A closed receiver already observed its own terminal outcome.
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Bounded channel whose receiving end is a message stream.
pub fn response_channel(capacity: usize) -> (ResponseSender, MessageStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ResponseSender { tx }, Box::pin(ReceiverStream::new(rx)))
}

fn decode_request<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidArgument(format!("failed to deserialize request: {}", e)))
}

fn encode_response<T: Serialize>(response: T) -> Result<Value, RpcError> {
    serde_json::to_value(response)
        .map_err(|e| RpcError::Internal(format!("failed to serialize response: {}", e)))
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Method path to handler table.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    methods: HashMap<String, MethodHandler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, method: &str) -> Option<&MethodHandler> {
        self.methods.get(method)
    }

    pub fn shape_of(&self, method: &str) -> Option<CallShape> {
        self.methods.get(method).map(MethodHandler::shape)
    }

    /// Registered method paths, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn insert(&mut self, method: &str, handler: MethodHandler) {
        if self.methods.insert(method.to_string(), handler).is_some() {
            tracing::warn!("Handler for {} registered twice; keeping the latest", method);
        }
    }

    /// Register a unary handler.
    pub fn unary<Req, Resp, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(HandlerContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: UnaryFn = Arc::new(move |ctx, value| {
            let handler = handler.clone();
            Box::pin(async move {
                let request: Req = decode_request(value)?;
                let response = handler(ctx, request).await?;
                encode_response(response)
            })
        });
        self.insert(method, MethodHandler::Unary(erased));
        self
    }

    /// Register a server-streaming handler. The handler sends responses
    /// through the `ResponseSender` and returns when the stream is complete.
    pub fn server_streaming<Req, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(HandlerContext, Req, ResponseSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ServerStreamingFn = Arc::new(move |ctx, value, sender| {
            let handler = handler.clone();
            Box::pin(async move {
                let request: Req = decode_request(value)?;
                handler(ctx, request, sender).await
            })
        });
        self.insert(method, MethodHandler::ServerStreaming(erased));
        self
    }

    /// Register a client-streaming handler.
    pub fn client_streaming<Resp, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        Resp: Serialize + Send + 'static,
        F: Fn(HandlerContext, RequestStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ClientStreamingFn = Arc::new(move |ctx, requests| {
            let handler = handler.clone();
            Box::pin(async move {
                let response = handler(ctx, requests).await?;
                encode_response(response)
            })
        });
        self.insert(method, MethodHandler::ClientStreaming(erased));
        self
    }

    /// Register a bidirectional-streaming handler.
    pub fn bidirectional<F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        F: Fn(HandlerContext, RequestStream, ResponseSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: BidirectionalFn = Arc::new(move |ctx, requests, sender| {
            let handler = handler.clone();
            Box::pin(handler(ctx, requests, sender))
        });
        self.insert(method, MethodHandler::Bidirectional(erased));
        self
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

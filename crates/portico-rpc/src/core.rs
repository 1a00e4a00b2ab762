// crates/portico-rpc/src/core.rs
//
// RPC core: runs every inbound call through the server chain and into the
// registered handler.
//
// The same `RpcCore` serves two doors. Native clients reach it through the
// tower `Service` impl, which lets tonic handle gRPC framing with the JSON
// codec. The gateway and tests reach it through the `Invoker` trait. Either
// way the chain wraps the call exactly once, at establishment.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::body::BoxBody;
use tonic::server::{
    ClientStreamingService, Grpc, ServerStreamingService, StreamingService, UnaryService,
};
use tonic::{Status, Streaming};

use portico_core::call::{Call, CallShape, MessageStream, Reply};
use portico_core::chain::{BoxFuture, Chain};
use portico_core::deadline::{guarded, GuardedStream};
use portico_core::error::RpcError;
use portico_core::traits::Invoker;

use crate::codec::JsonCodec;
use crate::convert;
use crate::registry::{HandlerContext, MethodHandler, RequestStream, ResponseSender, ServiceRegistry};

/// Default capacity of a streaming handler's response channel.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Server-side call dispatcher.
#[derive(Clone)]
pub struct RpcCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    registry: ServiceRegistry,
    chain: Chain,
    stream_buffer: usize,
}

impl RpcCore {
    /// Create a core serving `registry`, wrapping each call in `chain`.
    pub fn new(registry: ServiceRegistry, chain: Chain) -> Self {
        Self::with_stream_buffer(registry, chain, DEFAULT_STREAM_BUFFER)
    }

    pub fn with_stream_buffer(registry: ServiceRegistry, chain: Chain, stream_buffer: usize) -> Self {
        tracing::debug!(
            "RPC core serving {} methods with stages {:?}",
            registry.len(),
            chain.names()
        );
        Self {
            inner: Arc::new(CoreInner {
                registry,
                chain,
                stream_buffer: stream_buffer.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub fn chain(&self) -> &Chain {
        &self.inner.chain
    }

    /// Run a call through the server chain and its handler.
    pub async fn dispatch(&self, call: Call) -> Result<Reply, RpcError> {
        self.inner.chain.invoke(call, self.inner.as_ref()).await
    }
}

impl std::fmt::Debug for RpcCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCore")
            .field("methods", &self.inner.registry.len())
            .field("chain", &self.inner.chain)
            .finish()
    }
}

#[async_trait]
impl Invoker for RpcCore {
    async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
        self.dispatch(call).await
    }
}

/// The terminal invoker at the end of the server chain.
#[async_trait]
impl Invoker for CoreInner {
    async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
        let handler = self
            .registry
            .get(&call.method)
            .ok_or_else(|| RpcError::Unimplemented(format!("unknown method {}", call.method)))?;
        if handler.shape() != call.shape {
            return Err(RpcError::Unimplemented(format!(
                "{} is a {} method, called as {}",
                call.method,
                handler.shape(),
                call.shape
            )));
        }

        let Call {
            method,
            input,
            metadata,
            deadline,
            cancel,
            identity,
            ..
        } = call;
        let ctx = HandlerContext {
            method,
            metadata,
            identity,
            deadline,
            cancel: cancel.clone(),
        };

        match handler {
            MethodHandler::Unary(handler) => {
                let request = input.into_unary()?;
                let response = guarded(handler(ctx, request), deadline, &cancel).await?;
                Ok(Reply::Unary(response))
            }
            MethodHandler::ServerStreaming(handler) => {
                let request = input.into_unary()?;
                Ok(self.spawn_producer(deadline, cancel, |sender| handler(ctx, request, sender)))
            }
            MethodHandler::ClientStreaming(handler) => {
                let requests = RequestStream::new(input.into_stream());
                let response = guarded(handler(ctx, requests), deadline, &cancel).await?;
                Ok(Reply::Unary(response))
            }
            MethodHandler::Bidirectional(handler) => {
                let requests = RequestStream::new(input.into_stream());
                Ok(self.spawn_producer(deadline, cancel, |sender| handler(ctx, requests, sender)))
            }
        }
    }
}

impl CoreInner {
    /// Run a streaming handler on its own task and return its response
    /// stream. A handler error, deadline expiry, or cancellation becomes the
    /// stream's final item.
    fn spawn_producer<P>(&self, deadline: Option<Instant>, cancel: CancellationToken, produce: P) -> Reply
    where
        P: FnOnce(ResponseSender) -> BoxFuture<'static, Result<(), RpcError>>,
    {
        let (sender, stream) = crate::registry::response_channel(self.stream_buffer);
        let work = produce(sender.clone());
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = guarded(work, deadline, &task_cancel).await {
                sender.fail(e).await;
            }
        });
        Reply::Stream(GuardedStream::new(stream, deadline, cancel).boxed())
    }
}

// ---------------------------------------------------------------------------
// Tonic Service Wiring
// ---------------------------------------------------------------------------

type StatusStream = Pin<Box<dyn Stream<Item = Result<Value, Status>> + Send + 'static>>;

/// Per-request adapter between tonic's service traits and the core.
#[derive(Clone)]
struct CallAdapter {
    core: RpcCore,
    method: String,
}

impl CallAdapter {
    fn build_call(&self, metadata: &tonic::metadata::MetadataMap, shape: CallShape, input: CallInput) -> Call {
        let call = match (shape, input) {
            (CallShape::Unary, CallInput::Message(value)) => Call::unary(self.method.clone(), value),
            (CallShape::ServerStreaming, CallInput::Message(value)) => {
                Call::server_streaming(self.method.clone(), value)
            }
            (CallShape::Bidirectional, CallInput::Stream(stream)) => {
                Call::bidirectional(self.method.clone(), stream)
            }
            (_, CallInput::Stream(stream)) => Call::client_streaming(self.method.clone(), stream),
            (_, CallInput::Message(value)) => Call::unary(self.method.clone(), value),
        };
        let deadline = convert::timeout_from_tonic(metadata).map(|timeout| Instant::now() + timeout);
        call.with_metadata(convert::metadata_from_tonic(metadata))
            .with_deadline(deadline)
    }
}

enum CallInput {
    Message(Value),
    Stream(MessageStream),
}

fn inbound_stream(streaming: Streaming<Value>) -> MessageStream {
    Box::pin(streaming.map(|item| item.map_err(|status| convert::from_status(&status))))
}

fn outbound_stream(stream: MessageStream) -> StatusStream {
    Box::pin(stream.map(|item| item.map_err(convert::into_status)))
}

impl UnaryService<Value> for CallAdapter {
    type Response = Value;
    type Future = BoxFuture<'static, Result<tonic::Response<Value>, Status>>;

    fn call(&mut self, request: tonic::Request<Value>) -> Self::Future {
        let adapter = self.clone();
        Box::pin(async move {
            let metadata = request.metadata().clone();
            let input = CallInput::Message(request.into_inner());
            let call = adapter.build_call(&metadata, CallShape::Unary, input);
            let reply = adapter.core.dispatch(call).await.map_err(convert::into_status)?;
            let value = reply.into_unary().map_err(convert::into_status)?;
            Ok(tonic::Response::new(value))
        })
    }
}

impl ServerStreamingService<Value> for CallAdapter {
    type Response = Value;
    type ResponseStream = StatusStream;
    type Future = BoxFuture<'static, Result<tonic::Response<StatusStream>, Status>>;

    fn call(&mut self, request: tonic::Request<Value>) -> Self::Future {
        let adapter = self.clone();
        Box::pin(async move {
            let metadata = request.metadata().clone();
            let input = CallInput::Message(request.into_inner());
            let call = adapter.build_call(&metadata, CallShape::ServerStreaming, input);
            let reply = adapter.core.dispatch(call).await.map_err(convert::into_status)?;
            Ok(tonic::Response::new(outbound_stream(reply.into_stream())))
        })
    }
}

impl ClientStreamingService<Value> for CallAdapter {
    type Response = Value;
    type Future = BoxFuture<'static, Result<tonic::Response<Value>, Status>>;

    fn call(&mut self, request: tonic::Request<Streaming<Value>>) -> Self::Future {
        let adapter = self.clone();
        Box::pin(async move {
            let metadata = request.metadata().clone();
            let input = CallInput::Stream(inbound_stream(request.into_inner()));
            let call = adapter.build_call(&metadata, CallShape::ClientStreaming, input);
            let reply = adapter.core.dispatch(call).await.map_err(convert::into_status)?;
            let value = reply.into_unary().map_err(convert::into_status)?;
            Ok(tonic::Response::new(value))
        })
    }
}

impl StreamingService<Value> for CallAdapter {
    type Response = Value;
    type ResponseStream = StatusStream;
    type Future = BoxFuture<'static, Result<tonic::Response<StatusStream>, Status>>;

    fn call(&mut self, request: tonic::Request<Streaming<Value>>) -> Self::Future {
        let adapter = self.clone();
        Box::pin(async move {
            let metadata = request.metadata().clone();
            let input = CallInput::Stream(inbound_stream(request.into_inner()));
            let call = adapter.build_call(&metadata, CallShape::Bidirectional, input);
            let reply = adapter.core.dispatch(call).await.map_err(convert::into_status)?;
            Ok(tonic::Response::new(outbound_stream(reply.into_stream())))
        })
    }
}

// Implement the tower service by hand: tonic's `Grpc` handles framing for
// whichever shape the registry declares for the request path.
impl<B> tower_service::Service<http::Request<B>> for RpcCore
where
    B: HttpBody + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    B::Data: Send,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let core = self.clone();

        Box::pin(async move {
            let method = req.uri().path().to_string();
            let Some(shape) = core.inner.registry.shape_of(&method) else {
                tracing::debug!("Unknown gRPC method {}", method);
                return Ok(unimplemented_response(&method));
            };

            let adapter = CallAdapter { core, method };
            let mut grpc = Grpc::new(JsonCodec);
            let response = match shape {
                CallShape::Unary => grpc.unary(adapter, req).await,
                CallShape::ServerStreaming => grpc.server_streaming(adapter, req).await,
                CallShape::ClientStreaming => grpc.client_streaming(adapter, req).await,
                CallShape::Bidirectional => grpc.streaming(adapter, req).await,
            };
            Ok(response)
        })
    }
}

/// Trailers-only gRPC response for a path with no registered handler.
fn unimplemented_response(method: &str) -> http::Response<BoxBody> {
    let body = BoxBody::new(
        http_body_util::Full::new(Bytes::new())
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );
    let mut response = http::Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    headers.insert("grpc-status", http::HeaderValue::from(tonic::Code::Unimplemented as i32));
    if let Ok(message) = http::HeaderValue::from_str(&format!("unknown method {}", method)) {
        headers.insert("grpc-message", message);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::call::{collect_stream, stream_from_iter};
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry
            .unary("/t.S/Echo", |_ctx, req: Value| async move { Ok::<_, RpcError>(req) })
            .server_streaming("/t.S/Count", |_ctx, n: u64, sender: ResponseSender| async move {
                for i in 0..n {
                    sender.send(i).await?;
                }
                Ok::<_, RpcError>(())
            })
            .client_streaming("/t.S/Len", |_ctx, mut requests: RequestStream| async move {
                let mut len = 0usize;
                while requests.message::<Value>().await?.is_some() {
                    len += 1;
                }
                Ok::<_, RpcError>(len)
            })
            .unary("/t.S/Slow", |_ctx, _req: Value| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, RpcError>(Value::Null)
            })
            .server_streaming("/t.S/Forever", |_ctx, _req: Value, sender: ResponseSender| async move {
                loop {
                    if let Err(e) = sender.send(json!("tick")).await {
                        return Err::<(), RpcError>(e);
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });
        registry
    }

    #[tokio::test]
    async fn unary_dispatch() {
        let core = RpcCore::new(registry(), Chain::new());
        let reply = core
            .dispatch(Call::unary("/t.S/Echo", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap(), json!({"message": "hi"}));
    }

    #[tokio::test]
    async fn server_streaming_dispatch() {
        let core = RpcCore::new(registry(), Chain::new());
        let reply = core
            .dispatch(Call::server_streaming("/t.S/Count", json!(3)))
            .await
            .unwrap();
        let values = collect_stream(reply.into_stream(), None).await.unwrap();
        assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn client_streaming_dispatch() {
        let core = RpcCore::new(registry(), Chain::new());
        let requests = stream_from_iter(vec![json!(1), json!(2)]);
        let reply = core
            .dispatch(Call::client_streaming("/t.S/Len", requests))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn unknown_method_and_wrong_shape_are_unimplemented() {
        let core = RpcCore::new(registry(), Chain::new());
        let err = core
            .dispatch(Call::unary("/t.S/Missing", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unimplemented(_)));

        let err = core
            .dispatch(Call::unary("/t.S/Count", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unimplemented(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unary_deadline_expires() {
        let core = RpcCore::new(registry(), Chain::new());
        let call = Call::unary("/t.S/Slow", json!({})).with_timeout(Duration::from_secs(1));
        let started = Instant::now();
        let err = core.dispatch(call).await.unwrap_err();
        assert_eq!(err, RpcError::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_with_deadline_error() {
        let core = RpcCore::new(registry(), Chain::new());
        let call = Call::server_streaming("/t.S/Forever", json!({}))
            .with_timeout(Duration::from_millis(350));
        let mut stream = core.dispatch(call).await.unwrap().into_stream();

        let mut ticks = 0;
        let mut last = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => ticks += 1,
                Err(e) => last = Some(e),
            }
        }
        assert!(ticks >= 1);
        assert_eq!(last, Some(RpcError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn dropping_stream_cancels_producer() {
        let core = RpcCore::new(registry(), Chain::new());
        let cancel = CancellationToken::new();
        let call = Call::server_streaming("/t.S/Forever", json!({})).with_cancel(cancel.clone());
        let mut stream = core.dispatch(call).await.unwrap().into_stream();
        assert!(stream.next().await.is_some());
        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn tonic_adapters_forward_request_metadata() {
        let mut registry = ServiceRegistry::new();
        registry
            .unary("/t.S/Who", |ctx: HandlerContext, _req: Value| async move {
                Ok::<_, RpcError>(json!(ctx.metadata.get("x-user")))
            })
            .server_streaming("/t.S/WhoStream", |ctx: HandlerContext, _req: Value, sender: ResponseSender| async move {
                sender.send(json!(ctx.metadata.get("x-user"))).await?;
                Ok::<_, RpcError>(())
            });
        let core = RpcCore::new(registry, Chain::new());

        let mut request = tonic::Request::new(json!({}));
        request.metadata_mut().insert("x-user", "alice".parse().unwrap());
        let mut adapter = CallAdapter {
            core: core.clone(),
            method: "/t.S/Who".to_string(),
        };
        let response = UnaryService::call(&mut adapter, request).await.unwrap();
        assert_eq!(response.into_inner(), json!("alice"));

        let mut request = tonic::Request::new(json!({}));
        request.metadata_mut().insert("x-user", "bob".parse().unwrap());
        let mut adapter = CallAdapter {
            core,
            method: "/t.S/WhoStream".to_string(),
        };
        let response = ServerStreamingService::call(&mut adapter, request).await.unwrap();
        let values: Vec<Value> = response
            .into_inner()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!("bob")]);
    }
}

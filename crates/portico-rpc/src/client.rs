// crates/portico-rpc/src/client.rs
//
// RPC client over a tonic channel.
//
// Calls run through an optional client-side chain (credentials, logging,
// default deadline) before reaching the transport. The gateway uses this
// client to reach its own endpoint; the CLI uses it directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Streaming;

use portico_core::call::{Call, CallShape, MessageStream, Reply};
use portico_core::chain::Chain;
use portico_core::deadline::{guarded, GuardedStream};
use portico_core::error::RpcError;
use portico_core::metadata::Metadata;
use portico_core::traits::Invoker;

use crate::codec::JsonCodec;
use crate::convert;

/// TLS settings for reaching a server.
#[derive(Debug, Clone)]
pub struct ClientTls {
    /// PEM bundle of the CA that signed the server certificate.
    pub ca_pem: Vec<u8>,
    /// Name to verify the server certificate against.
    pub domain: Option<String>,
}

/// Errors setting up a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint {0:?}: {1}")]
    InvalidEndpoint(String, String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// A client bound to one endpoint.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<Transport>,
    chain: Chain,
}

impl RpcClient {
    /// Connect eagerly, failing if the endpoint cannot be reached.
    pub async fn connect(addr: &str, tls: Option<ClientTls>) -> Result<Self, ClientError> {
        let endpoint = endpoint(addr, tls)?;
        let channel = endpoint.connect().await?;
        tracing::debug!("Connected to {}", addr);
        Ok(Self::from_channel(channel))
    }

    /// Build a client that connects on first use.
    pub fn connect_lazy(addr: &str, tls: Option<ClientTls>) -> Result<Self, ClientError> {
        let endpoint = endpoint(addr, tls)?;
        Ok(Self::from_channel(endpoint.connect_lazy()))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            transport: Arc::new(Transport { channel }),
            chain: Chain::new(),
        }
    }

    /// Wrap every outbound call in `chain`.
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Issue a call of any shape.
    pub async fn call(&self, call: Call) -> Result<Reply, RpcError> {
        self.chain.invoke(call, self.transport.as_ref()).await
    }

    /// Typed unary call.
    pub async fn unary<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request = serde_json::to_value(request)?;
        let reply = self.call(Call::unary(method, request)).await?;
        decode_reply(reply.into_unary()?)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("chain", &self.chain)
            .finish()
    }
}

#[async_trait]
impl Invoker for RpcClient {
    async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
        self.call(call).await
    }
}

/// Decode a response message into a concrete type.
pub fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::Internal(format!("failed to deserialize response: {}", e)))
}

fn endpoint(addr: &str, tls: Option<ClientTls>) -> Result<Endpoint, ClientError> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else if tls.is_some() {
        format!("https://{}", addr)
    } else {
        format!("http://{}", addr)
    };
    let endpoint = Endpoint::from_shared(uri.clone())
        .map_err(|e| ClientError::InvalidEndpoint(uri.clone(), format!("{}", e)))?;

    match tls {
        Some(tls) => {
            let mut config = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(tls.ca_pem));
            if let Some(domain) = tls.domain {
                config = config.domain_name(domain);
            }
            Ok(endpoint.tls_config(config)?)
        }
        None => Ok(endpoint),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The terminal invoker at the end of the client chain.
struct Transport {
    channel: Channel,
}

fn inbound_stream(streaming: Streaming<Value>) -> MessageStream {
    Box::pin(streaming.map(|item| item.map_err(|status| convert::from_status(&status))))
}

#[async_trait]
impl Invoker for Transport {
    async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
        let path = PathAndQuery::try_from(call.method.as_str()).map_err(|e| {
            RpcError::InvalidArgument(format!("invalid method path {:?}: {}", call.method, e))
        })?;
        let timeout = call.remaining();
        let Call {
            shape,
            input,
            metadata,
            deadline,
            cancel,
            ..
        } = call;

        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| RpcError::Unavailable(format!("transport not ready: {}", e)))?;

        match shape {
            CallShape::Unary => {
                let request = build_request(input.into_unary()?, &metadata, timeout);
                let work = async {
                    let response = grpc
                        .unary(request, path, JsonCodec)
                        .await
                        .map_err(|status| convert::from_status(&status))?;
                    Ok::<_, RpcError>(Reply::Unary(response.into_inner()))
                };
                guarded(work, deadline, &cancel).await
            }
            CallShape::ServerStreaming => {
                let request = build_request(input.into_unary()?, &metadata, timeout);
                let work = async {
                    grpc.server_streaming(request, path, JsonCodec)
                        .await
                        .map_err(|status| convert::from_status(&status))
                };
                let response = guarded(work, deadline, &cancel).await?;
                let stream = inbound_stream(response.into_inner());
                Ok(Reply::Stream(GuardedStream::new(stream, deadline, cancel).boxed()))
            }
            CallShape::ClientStreaming => {
                let failure = OutboundFailure::default();
                let outbound = outbound_stream(input.into_stream(), failure.clone(), cancel.clone());
                let request = build_request(outbound, &metadata, timeout);
                let work = async {
                    let response = grpc
                        .client_streaming(request, path, JsonCodec)
                        .await
                        .map_err(|status| convert::from_status(&status))?;
                    Ok::<_, RpcError>(Reply::Unary(response.into_inner()))
                };
                let result = guarded(work, deadline, &cancel).await;
                match failure.take() {
                    Some(err) => Err(err),
                    None => result,
                }
            }
            CallShape::Bidirectional => {
                let failure = OutboundFailure::default();
                let outbound = outbound_stream(input.into_stream(), failure.clone(), cancel.clone());
                let request = build_request(outbound, &metadata, timeout);
                let work = async {
                    grpc.streaming(request, path, JsonCodec)
                        .await
                        .map_err(|status| convert::from_status(&status))
                };
                let response = guarded(work, deadline, &cancel)
                    .await
                    .map_err(|err| failure.take().unwrap_or(err))?;
                let stream = inbound_stream(response.into_inner());
                let stream = GuardedStream::new(stream, deadline, cancel)
                    .map(move |item| item.map_err(|err| failure.take().unwrap_or(err)));
                Ok(Reply::Stream(Box::pin(stream)))
            }
        }
    }
}

fn build_request<T>(message: T, metadata: &Metadata, timeout: Option<Duration>) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    convert::metadata_into_tonic(metadata, request.metadata_mut());
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

/// First error pulled from a call's own request stream.
#[derive(Clone, Default)]
struct OutboundFailure(Arc<Mutex<Option<RpcError>>>);

impl OutboundFailure {
    fn record(&self, err: RpcError) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<RpcError> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Request messages as tonic expects them.
///
/// A failed item ends the outbound stream, records the error in `failure`,
/// and cancels the call so the error is what the caller sees.
fn outbound_stream(
    stream: MessageStream,
    failure: OutboundFailure,
    cancel: CancellationToken,
) -> impl tokio_stream::Stream<Item = Value> + Send + 'static {
    stream.map_while(move |item| match item {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!("Request stream failed, cancelling call: {}", err);
            failure.record(err);
            cancel.cancel();
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_follows_tls() {
        let plain = endpoint("127.0.0.1:50051", None).unwrap();
        assert_eq!(plain.uri().scheme_str(), Some("http"));

        let explicit = endpoint("http://localhost:9000", None).unwrap();
        assert_eq!(explicit.uri().port_u16(), Some(9000));
    }

    #[test]
    fn invalid_endpoint_is_reported() {
        let err = endpoint("not a uri", None).unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint(..)));
    }

    #[tokio::test]
    async fn failed_request_item_ends_stream_and_cancels() {
        let failure = OutboundFailure::default();
        let cancel = CancellationToken::new();
        let requests: MessageStream = Box::pin(tokio_stream::iter(vec![
            Ok(serde_json::json!({"num": 1})),
            Err(RpcError::Internal("source failed".to_string())),
            Ok(serde_json::json!({"num": 100})),
        ]));

        let sent: Vec<Value> = outbound_stream(requests, failure.clone(), cancel.clone())
            .collect()
            .await;
        assert_eq!(sent, vec![serde_json::json!({"num": 1})]);
        assert!(cancel.is_cancelled());
        assert_eq!(
            failure.take(),
            Some(RpcError::Internal("source failed".to_string()))
        );
        assert_eq!(failure.take(), None);
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let client = RpcClient::connect_lazy("127.0.0.1:1", None).unwrap();
        let err = client
            .call(Call::unary("/portico.echo.Echo/UnaryEcho", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RpcError::Unavailable(_) | RpcError::Internal(_)),
            "unexpected error: {:?}",
            err
        );
    }
}

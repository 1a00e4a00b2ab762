// crates/portico-rpc/src/server.rs
//
// Server setup: RpcConfig and PorticoServer.
//
// One listener serves everything. Each accepted connection is optionally
// wrapped in TLS, then handed to hyper's auto builder so HTTP/1.1 and HTTP/2
// share the port. Every request is classified once by the protocol router and
// sent to the RPC core, the transcoding gateway, or the static asset handler.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tonic::body::BoxBody;
use tonic::Status;

use crate::assets::StaticAssets;
use crate::core::RpcCore;
use crate::gateway::Gateway;
use crate::router::{classify, RouteDecision};

// ---------------------------------------------------------------------------
// RpcConfig
// ---------------------------------------------------------------------------

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
        }
    }
}

/// Errors raised while starting or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// PorticoServer
// ---------------------------------------------------------------------------

/// The single-endpoint server.
#[derive(Clone)]
pub struct PorticoServer {
    config: RpcConfig,
    dispatcher: Dispatcher,
    tls: Option<Arc<ServerConfig>>,
}

impl std::fmt::Debug for PorticoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PorticoServer")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .field("gateway", &self.dispatcher.gateway.is_some())
            .field("assets", &self.dispatcher.assets.is_some())
            .finish()
    }
}

impl PorticoServer {
    /// Create a plaintext server for `core` with no gateway or assets.
    pub fn new(config: RpcConfig, core: RpcCore) -> Self {
        Self {
            config,
            dispatcher: Dispatcher {
                core,
                gateway: None,
                assets: None,
            },
            tls: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.dispatcher.gateway = Some(gateway);
        self
    }

    pub fn with_assets(mut self, assets: StaticAssets) -> Self {
        self.dispatcher.assets = Some(assets);
        self
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, tls: Arc<ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e))
    }

    /// Serve until the process is terminated.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve connections from an already-bound listener until `signal`
    /// resolves. Connections in flight keep running on their own tasks.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        tracing::info!("Portico server listening on {}://{}", scheme, local);

        let acceptor = self.tls.clone().map(TlsAcceptor::from);
        let builder = Builder::new(TokioExecutor::new());
        tokio::pin!(signal);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut signal => {
                    tracing::info!("Portico server on {} shutting down", local);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let dispatcher = self.dispatcher.clone();
            let builder = builder.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(builder, TokioIo::new(tls_stream), dispatcher, peer)
                                .await
                        }
                        Err(e) => tracing::warn!("TLS handshake with {} failed: {}", peer, e),
                    },
                    None => serve_connection(builder, TokioIo::new(stream), dispatcher, peer).await,
                }
            });
        }

        Ok(())
    }
}

async fn serve_connection<I>(
    builder: Builder<TokioExecutor>,
    io: I,
    dispatcher: Dispatcher,
    peer: SocketAddr,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let dispatcher = dispatcher.clone();
        async move { Ok::<_, Infallible>(dispatcher.dispatch(request).await) }
    });
    if let Err(e) = builder.serve_connection(io, service).await {
        tracing::debug!("Connection from {} ended with error: {}", peer, e);
    }
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Dispatcher {
    core: RpcCore,
    gateway: Option<Gateway>,
    assets: Option<StaticAssets>,
}

impl Dispatcher {
    async fn dispatch(&self, request: Request<Incoming>) -> Response<BoxBody> {
        match classify(&request) {
            RouteDecision::NativeRpc => {
                let mut core = self.core.clone();
                match tower_service::Service::call(&mut core, request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
            RouteDecision::StaticAsset => match &self.assets {
                Some(assets) => {
                    boxed(assets.serve(request.method(), request.uri().path()).await)
                }
                None => not_found(),
            },
            RouteDecision::RestTranscode => match &self.gateway {
                Some(gateway) => boxed(gateway.handle(request).await),
                None => not_found(),
            },
        }
    }
}

fn boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| BoxBody::new(body.map_err(|e| Status::internal(format!("body error: {}", e)))))
}

fn not_found() -> Response<BoxBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    boxed(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceRegistry;
    use portico_core::chain::Chain;

    #[test]
    fn default_config_binds_localhost() {
        let config = RpcConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 50051);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_accept_loop() {
        let server = PorticoServer::new(
            RpcConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            RpcCore::new(ServiceRegistry::new(), Chain::new()),
        );
        let listener = server.bind().await.unwrap();
        server.serve_listener(listener, async {}).await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let server = PorticoServer::new(
            RpcConfig {
                host: "203.0.113.300".to_string(),
                port: 1,
            },
            RpcCore::new(ServiceRegistry::new(), Chain::new()),
        );
        let err = server.bind().await.unwrap_err();
        assert!(err.to_string().contains("203.0.113.300:1"));
    }
}

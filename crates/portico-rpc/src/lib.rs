// crates/portico-rpc/src/lib.rs
//
// portico-rpc: RPC core, interceptor stages, protocol router, and REST
// transcoding gateway for Portico.
//
// Uses tonic for gRPC framing with a JSON message codec instead of protobuf
// codegen, and hyper's auto builder so native RPC and REST share one
// TLS endpoint.

pub mod assets;
pub mod client;
pub mod codec;
pub mod convert;
pub mod core;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod server;
pub mod tls;

// Re-export the main types for ergonomic access.
pub use assets::StaticAssets;
pub use client::{ClientError, ClientTls, RpcClient};
pub use codec::JsonCodec;
pub use self::core::RpcCore;
pub use gateway::{Gateway, GatewayConfig, RestBinding};
pub use middleware::{build_chain, StageConfig};
pub use registry::{HandlerContext, RequestStream, ResponseSender, ServiceRegistry};
pub use router::{classify, route, RouteDecision};
pub use server::{PorticoServer, RpcConfig, ServerError};

// crates/portico-rpc/src/handlers/greet.rs

use serde::{Deserialize, Serialize};

use crate::registry::{HandlerContext, ServiceRegistry};

pub const SAY_HELLO: &str = "/portico.greet.Greeter/SayHello";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

pub fn register(registry: &mut ServiceRegistry) {
    registry.unary(SAY_HELLO, |ctx: HandlerContext, req: HelloRequest| async move {
        tracing::debug!("SayHello for {:?} from {:?}", req.name, ctx.identity);
        Ok::<_, portico_core::error::RpcError>(HelloReply {
            message: format!("Hello {}", req.name),
        })
    });
}

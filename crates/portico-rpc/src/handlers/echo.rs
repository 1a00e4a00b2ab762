// crates/portico-rpc/src/handlers/echo.rs
//
// Echo service in all four call shapes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use portico_core::error::RpcError;

use crate::registry::{HandlerContext, RequestStream, ResponseSender, ServiceRegistry};

pub const UNARY_ECHO: &str = "/portico.echo.Echo/UnaryEcho";
pub const SERVER_STREAMING_ECHO: &str = "/portico.echo.Echo/ServerStreamingEcho";
pub const CLIENT_STREAMING_ECHO: &str = "/portico.echo.Echo/ClientStreamingEcho";
pub const BIDIRECTIONAL_STREAMING_ECHO: &str = "/portico.echo.Echo/BidirectionalStreamingEcho";

/// Copies sent back by ServerStreamingEcho.
pub const STREAMING_COUNT: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub message: String,
}

/// Tunables for the echo service.
#[derive(Debug, Clone)]
pub struct EchoOptions {
    /// UnaryEcho refuses longer messages; `None` disables the check.
    pub max_message_len: Option<usize>,
    /// Artificial processing time before each unary reply.
    pub delay: Duration,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            max_message_len: Some(10),
            delay: Duration::ZERO,
        }
    }
}

pub fn register(registry: &mut ServiceRegistry, options: EchoOptions) {
    registry
        .unary(UNARY_ECHO, move |_ctx: HandlerContext, req: EchoRequest| {
            let options = options.clone();
            async move {
                if !options.delay.is_zero() {
                    tokio::time::sleep(options.delay).await;
                }
                if let Some(max) = options.max_message_len {
                    if req.message.chars().count() > max {
                        return Err(RpcError::InvalidArgument(format!(
                            "Length of `Message` cannot be more than {} characters",
                            max
                        )));
                    }
                }
                Ok(EchoResponse {
                    message: req.message,
                })
            }
        })
        .server_streaming(
            SERVER_STREAMING_ECHO,
            |_ctx: HandlerContext, req: EchoRequest, sender: ResponseSender| async move {
                for _ in 0..STREAMING_COUNT {
                    sender
                        .send(EchoResponse {
                            message: req.message.clone(),
                        })
                        .await?;
                }
                Ok::<_, RpcError>(())
            },
        )
        .client_streaming(
            CLIENT_STREAMING_ECHO,
            |_ctx: HandlerContext, mut requests: RequestStream| async move {
                // Replies with the last message received.
                let mut message = String::new();
                while let Some(req) = requests.message::<EchoRequest>().await? {
                    message = req.message;
                }
                Ok::<_, RpcError>(EchoResponse { message })
            },
        )
        .bidirectional(
            BIDIRECTIONAL_STREAMING_ECHO,
            |_ctx: HandlerContext, mut requests: RequestStream, sender: ResponseSender| async move {
                while let Some(req) = requests.message::<EchoRequest>().await? {
                    sender
                        .send(EchoResponse {
                            message: req.message,
                        })
                        .await?;
                }
                Ok::<_, RpcError>(())
            },
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RpcCore;
    use portico_core::call::{collect_stream, stream_from_iter, Call};
    use portico_core::chain::Chain;
    use serde_json::json;

    fn core(options: EchoOptions) -> RpcCore {
        let mut registry = ServiceRegistry::new();
        register(&mut registry, options);
        RpcCore::new(registry, Chain::new())
    }

    #[tokio::test]
    async fn unary_echo_enforces_length() {
        let core = core(EchoOptions::default());
        let reply = core
            .dispatch(Call::unary(UNARY_ECHO, json!({"message": "Madman"})))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap(), json!({"message": "Madman"}));

        let err = core
            .dispatch(Call::unary(UNARY_ECHO, json!({"message": "madmalls.com"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RpcError::InvalidArgument(
                "Length of `Message` cannot be more than 10 characters".to_string()
            )
        );
    }

    #[tokio::test]
    async fn limit_can_be_disabled() {
        let core = core(EchoOptions {
            max_message_len: None,
            ..EchoOptions::default()
        });
        let reply = core
            .dispatch(Call::unary(UNARY_ECHO, json!({"message": "madmalls.com"})))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap()["message"], "madmalls.com");
    }

    #[tokio::test]
    async fn streaming_shapes() {
        let core = core(EchoOptions::default());

        let reply = core
            .dispatch(Call::server_streaming(SERVER_STREAMING_ECHO, json!({"message": "hi"})))
            .await
            .unwrap();
        let values = collect_stream(reply.into_stream(), None).await.unwrap();
        assert_eq!(values.len(), STREAMING_COUNT);

        let requests = stream_from_iter(vec![json!({"message": "a"}), json!({"message": "b"})]);
        let reply = core
            .dispatch(Call::client_streaming(CLIENT_STREAMING_ECHO, requests))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap(), json!({"message": "b"}));

        let requests = stream_from_iter(
            (1..=5)
                .map(|i| json!({"message": format!("Request {}", i)}))
                .collect(),
        );
        let reply = core
            .dispatch(Call::bidirectional(BIDIRECTIONAL_STREAMING_ECHO, requests))
            .await
            .unwrap();
        let values = collect_stream(reply.into_stream(), None).await.unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[4], json!({"message": "Request 5"}));
    }
}

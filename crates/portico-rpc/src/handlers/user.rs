// crates/portico-rpc/src/handlers/user.rs
//
// User service over a shared `UserStore`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use portico_core::error::RpcError;
use portico_core::traits::UserStore;
use portico_core::user::User;

use crate::registry::{HandlerContext, ServiceRegistry};

pub const CREATE: &str = "/portico.user.UserService/Create";
pub const GET: &str = "/portico.user.UserService/Get";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub user: User,
}

/// Create replies with an empty message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetResponse {
    pub user: User,
}

pub fn register(registry: &mut ServiceRegistry, store: Arc<dyn UserStore>) {
    let create_store = store.clone();
    registry
        .unary(CREATE, move |_ctx: HandlerContext, req: CreateRequest| {
            let store = create_store.clone();
            async move {
                if req.user.username.is_empty() {
                    return Err(RpcError::InvalidArgument("username cannot be empty".to_string()));
                }
                if req.user.password.is_empty() {
                    return Err(RpcError::InvalidArgument("password cannot be empty".to_string()));
                }
                tracing::info!("Creating user {}", req.user.username);
                store.put_user(req.user).await?;
                Ok(Empty {})
            }
        })
        .unary(GET, move |_ctx: HandlerContext, req: GetRequest| {
            let store = store.clone();
            async move {
                if req.username.is_empty() {
                    return Err(RpcError::InvalidArgument("username cannot be empty".to_string()));
                }
                match store.get_user(&req.username).await? {
                    Some(user) => Ok(GetResponse { user }),
                    None => Err(RpcError::NotFound("user not found".to_string())),
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RpcCore;
    use portico_core::call::Call;
    use portico_core::chain::Chain;
    use portico_store::InMemoryUserStore;
    use serde_json::json;

    fn core() -> (RpcCore, Arc<InMemoryUserStore>) {
        let store = Arc::new(InMemoryUserStore::new());
        let mut registry = ServiceRegistry::new();
        register(&mut registry, store.clone());
        (RpcCore::new(registry, Chain::new()), store)
    }

    #[tokio::test]
    async fn create_then_get() {
        let (core, store) = core();
        let reply = core
            .dispatch(Call::unary(
                CREATE,
                json!({"user": {"username": "Alice", "password": "123"}}),
            ))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap(), json!({}));
        assert_eq!(store.count().await.unwrap(), 1);

        let reply = core
            .dispatch(Call::unary(GET, json!({"username": "Alice"})))
            .await
            .unwrap();
        assert_eq!(reply.into_unary().unwrap()["user"]["username"], "Alice");

        let err = core
            .dispatch(Call::unary(GET, json!({"username": "Bob"})))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NotFound("user not found".to_string()));
    }

    #[tokio::test]
    async fn empty_fields_are_invalid() {
        let (core, store) = core();
        let err = core
            .dispatch(Call::unary(CREATE, json!({"user": {"username": "", "password": "x"}})))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::InvalidArgument("username cannot be empty".to_string()));

        let err = core
            .dispatch(Call::unary(CREATE, json!({"user": {"username": "a"}})))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::InvalidArgument("password cannot be empty".to_string()));

        let err = core
            .dispatch(Call::unary(GET, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

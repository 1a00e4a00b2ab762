// crates/portico-store/src/users.rs
//
// In-memory user store implementing the `UserStore` trait.
//
// A single map keyed by username behind a reader-writer lock. Writes to an
// existing username replace the record.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use portico_core::error::RpcError;
use portico_core::traits::UserStore;
use portico_core::user::User;

/// In-memory user records keyed by username.
#[derive(Debug)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-populated with `users`.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users
            .into_iter()
            .map(|user| (user.username.clone(), user))
            .collect();
        Self {
            users: RwLock::new(map),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn put_user(&self, user: User) -> Result<(), RpcError> {
        let mut users = self
            .users
            .write()
            .map_err(|e| RpcError::Internal(format!("RwLock poisoned: {}", e)))?;
        users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>, RpcError> {
        let users = self
            .users
            .read()
            .map_err(|e| RpcError::Internal(format!("RwLock poisoned: {}", e)))?;
        Ok(users.get(username).cloned())
    }

    async fn count(&self) -> Result<usize, RpcError> {
        let users = self
            .users
            .read()
            .map_err(|e| RpcError::Internal(format!("RwLock poisoned: {}", e)))?;
        Ok(users.len())
    }
}

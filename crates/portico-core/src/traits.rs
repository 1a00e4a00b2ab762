// crates/portico-core/src/traits.rs
//
// Trait seams between the core and the crates that plug into it.

use async_trait::async_trait;

use crate::call::{Call, Reply};
use crate::error::RpcError;
use crate::user::User;

/// Something that can complete a call: the server's dispatcher, a client
/// transport, or a test double.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, call: Call) -> Result<Reply, RpcError>;
}

/// Storage for user records.
///
/// Implementations must tolerate concurrent calls; writes to the same
/// username are last-writer-wins.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or replace the record for `user.username`.
    async fn put_user(&self, user: User) -> Result<(), RpcError>;

    /// Look up a record by username.
    async fn get_user(&self, username: &str) -> Result<Option<User>, RpcError>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize, RpcError>;
}

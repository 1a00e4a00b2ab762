// crates/portico-core/src/lib.rs
//
// portico-core: Core types, credential validation, and the interceptor chain
// for the Portico RPC gateway.
//
// This is the leaf crate that the rest of the workspace depends on. It knows
// nothing about the wire transport: calls, metadata, credentials, and stages
// are expressed here so they can be exercised in-process and reused on both
// the client and server side of a connection.

pub mod call;
pub mod chain;
pub mod credential;
pub mod deadline;
pub mod error;
pub mod metadata;
pub mod traits;
pub mod user;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use portico_core::Call;`

// Call model
pub use call::{Call, CallShape, Input, MessageStream, Reply};

// Interceptor chain
pub use chain::{BoxFuture, Chain, ChainBuilder, Next, Stage};

// Credentials
pub use credential::{
    authenticate, extract_credential, parse_credential, validate, Credential, Identity, Scheme, SchemePolicy,
};

// Metadata
pub use metadata::Metadata;

// Error types
pub use error::{AuthError, ErrorKind, RpcError};

// Traits
pub use traits::{Invoker, UserStore};

// User record
pub use user::User;

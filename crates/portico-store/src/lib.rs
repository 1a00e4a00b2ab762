// crates/portico-store/src/lib.rs
//
// portico-store: Storage layer for the Portico RPC gateway.
//
// Provides the in-memory user store backing the demonstration user service.
// Records live for the lifetime of the process.

pub mod users;

// Re-export key types for ergonomic access from downstream crates.
pub use users::InMemoryUserStore;

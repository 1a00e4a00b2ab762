// crates/portico-cli/src/commands/mod.rs
//
// Command module declarations for the Portico CLI.

pub mod echo;
pub mod greet;
pub mod math;
pub mod user;

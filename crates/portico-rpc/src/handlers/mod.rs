// crates/portico-rpc/src/handlers/mod.rs
//
// Bundled services: echo, math, greeter, and user storage.

pub mod echo;
pub mod greet;
pub mod math;
pub mod user;

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use portico_core::traits::UserStore;

use crate::registry::ServiceRegistry;

pub use echo::EchoOptions;

/// Register every bundled service.
pub fn register_all(registry: &mut ServiceRegistry, echo: EchoOptions, users: Arc<dyn UserStore>) {
    echo::register(registry, echo);
    math::register(registry);
    greet::register(registry);
    user::register(registry, users);
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    String(String),
}

/// Accept a number either as a JSON number or as a decimal string.
///
/// REST path and query fields always arrive as strings.
pub(crate) fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

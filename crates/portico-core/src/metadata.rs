// crates/portico-core/src/metadata.rs
//
// Call-scoped header metadata and the extractor helpers that read it.
//
// Keys are case-insensitive (stored lowercased) and multi-valued: each key
// maps to an ordered sequence of string values, mirroring HTTP/2 headers.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AuthError;

/// Reserved key carrying `"<Scheme> <value>"` credentials.
pub const AUTHORIZATION: &str = "authorization";
/// Correlation id assigned by the logging stage when absent.
pub const REQUEST_ID: &str = "x-request-id";
/// Subject of the identity established by the server auth stage.
pub const IDENTITY: &str = "x-portico-identity";
/// Trailer key carrying the exact [`AuthError`] tag across the wire.
pub const AUTH_ERROR: &str = "x-portico-auth-error";
/// gRPC deadline header.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Case-insensitive, multi-valued call metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, keeping any existing values.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values under `key` with a single value.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_lowercase(), vec![value.into()]);
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove and return all values under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Iterate `(key, value)` pairs; keys with several values repeat.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.append(key.as_ref(), value);
        }
        metadata
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Read the credential header from call metadata.
///
/// An absent header and a header that is present but blank are both
/// `MissingCredential`. Only the first value is considered.
pub fn authorization(metadata: &Metadata) -> Result<&str, AuthError> {
    match metadata.get(AUTHORIZATION) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AuthError::MissingCredential),
    }
}

/// Parse a `grpc-timeout` header value (`<digits><unit>`, unit one of
/// `H M S m u n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Render a duration as a `grpc-timeout` header value.
///
/// The value has at most eight digits, so coarser units are chosen as the
/// duration grows.
pub fn format_grpc_timeout(duration: Duration) -> String {
    const MAX: u128 = 99_999_999;
    let nanos = duration.as_nanos();
    if nanos <= MAX {
        return format!("{}n", nanos);
    }
    let micros = duration.as_micros();
    if micros <= MAX {
        return format!("{}u", micros);
    }
    let millis = duration.as_millis();
    if millis <= MAX {
        return format!("{}m", millis);
    }
    let secs = duration.as_secs() as u128;
    if secs <= MAX {
        return format!("{}S", secs);
    }
    format!("{}M", (secs / 60).min(MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.append("Authorization", "Bearer a");
        assert_eq!(md.get("authorization"), Some("Bearer a"));
        assert_eq!(md.get("AUTHORIZATION"), Some("Bearer a"));
        assert!(md.contains_key("aUtHoRiZaTiOn"));
    }

    #[test]
    fn values_keep_insertion_order() {
        let mut md = Metadata::new();
        md.append("x-tag", "one");
        md.append("X-Tag", "two");
        assert_eq!(md.get_all("x-tag"), ["one".to_string(), "two".to_string()]);
        assert_eq!(md.get("x-tag"), Some("one"));

        md.insert("x-tag", "three");
        assert_eq!(md.get_all("x-tag"), ["three".to_string()]);
        assert_eq!(md.len(), 1);
    }

    #[test]
    fn authorization_missing_and_empty_are_both_missing() {
        let absent = Metadata::new();
        assert_eq!(authorization(&absent), Err(AuthError::MissingCredential));

        let empty: Metadata = [(AUTHORIZATION, "")].into_iter().collect();
        assert_eq!(authorization(&empty), Err(AuthError::MissingCredential));

        let blank: Metadata = [(AUTHORIZATION, "   ")].into_iter().collect();
        assert_eq!(authorization(&blank), Err(AuthError::MissingCredential));

        let present: Metadata = [(AUTHORIZATION, "Bearer t")].into_iter().collect();
        assert_eq!(authorization(&present), Ok("Bearer t"));
    }

    #[test]
    fn grpc_timeout_parsing() {
        assert_eq!(parse_grpc_timeout("1S"), Some(Duration::from_secs(1)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_grpc_timeout("5"), None);
        assert_eq!(parse_grpc_timeout("12x"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[test]
    fn grpc_timeout_formatting_round_trips() {
        for duration in [
            Duration::from_millis(1),
            Duration::from_secs(1),
            Duration::from_secs(30),
            Duration::from_secs(86_400),
        ] {
            let rendered = format_grpc_timeout(duration);
            assert!(rendered.len() <= 9, "{} too long", rendered);
            assert_eq!(parse_grpc_timeout(&rendered), Some(duration));
        }
    }
}

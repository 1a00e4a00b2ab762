// crates/portico-core/src/credential.rs
//
// Credential parsing and validation.
//
// A credential travels as a single `authorization` metadata value of the form
// `"<Scheme> <value>"`. Parsing turns that text into a tagged `Credential`;
// validation checks the tagged value against the route's `SchemePolicy`.
// Scheme names are case-sensitive.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::metadata::{self, Metadata};

/// Supported header schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Basic,
    Bearer,
}

impl Scheme {
    /// The textual scheme as it appears in the header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Basic => "Basic",
            Scheme::Bearer => "Bearer",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A single credential attached to a call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// No credential.
    None,
    /// Shared-secret username/password pair.
    Basic { username: String, password: String },
    /// Static bearer token.
    Bearer { token: String },
    /// OAuth2 access token; sent with the `Bearer` scheme.
    OAuth2 { access_token: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
            Credential::OAuth2 { .. } => f
                .debug_struct("OAuth2")
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

impl Credential {
    /// The header scheme this credential is sent with.
    pub fn scheme(&self) -> Option<Scheme> {
        match self {
            Credential::None => None,
            Credential::Basic { .. } => Some(Scheme::Basic),
            Credential::Bearer { .. } | Credential::OAuth2 { .. } => Some(Scheme::Bearer),
        }
    }

    /// Render the `authorization` header value, or `None` for `Credential::None`.
    pub fn to_header(&self) -> Option<String> {
        match self {
            Credential::None => None,
            Credential::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", encoded))
            }
            Credential::Bearer { token } => Some(format!("Bearer {}", token)),
            Credential::OAuth2 { access_token } => Some(format!("Bearer {}", access_token)),
        }
    }
}

/// Parse an `authorization` header value into a tagged credential.
///
/// Bearer-scheme headers always parse as `Credential::Bearer`; an OAuth2
/// access token is indistinguishable from a bearer token on the wire.
pub fn parse_credential(header: &str) -> Result<Credential, AuthError> {
    let Some((scheme, value)) = header.split_once(' ') else {
        return Err(AuthError::SchemeMismatch(
            "missing scheme prefix in \"authorization\" header".to_string(),
        ));
    };

    match scheme {
        "Basic" => parse_basic(value),
        "Bearer" => Ok(Credential::Bearer {
            token: value.to_string(),
        }),
        other => Err(AuthError::SchemeMismatch(format!(
            "unsupported authorization scheme \"{}\"",
            other
        ))),
    }
}

/// Decode the payload of a `Basic` header.
///
/// The username ends at the first `:`; a password containing `:` is kept
/// intact.
fn parse_basic(encoded: &str) -> Result<Credential, AuthError> {
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::MalformedCredential("invalid base64 in header".to_string()))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| AuthError::MalformedCredential("invalid utf-8 in basic credential".to_string()))?;
    let (username, password) = text
        .split_once(':')
        .ok_or_else(|| AuthError::MalformedCredential("invalid basic auth format".to_string()))?;

    Ok(Credential::Basic {
        username: username.to_string(),
        password: password.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Policy and identity
// ---------------------------------------------------------------------------

/// Authentication policy for a route.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum SchemePolicy {
    /// Authentication disabled; every call gets the anonymous identity.
    Anonymous,
    /// A single configured username/password pair.
    Basic { username: String, password: String },
    /// A single configured static token.
    Bearer {
        token: String,
        /// Subject recorded on identities authenticated by this token.
        #[serde(default = "default_bearer_subject")]
        subject: String,
    },
}

fn default_bearer_subject() -> String {
    "token".to_string()
}

impl Default for SchemePolicy {
    fn default() -> Self {
        SchemePolicy::Anonymous
    }
}

impl std::fmt::Debug for SchemePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemePolicy::Anonymous => f.write_str("Anonymous"),
            SchemePolicy::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            SchemePolicy::Bearer { subject, .. } => f
                .debug_struct("Bearer")
                .field("subject", subject)
                .finish_non_exhaustive(),
        }
    }
}

impl SchemePolicy {
    /// The scheme this policy expects, or `None` when anonymous.
    pub fn scheme(&self) -> Option<Scheme> {
        match self {
            SchemePolicy::Anonymous => None,
            SchemePolicy::Basic { .. } => Some(Scheme::Basic),
            SchemePolicy::Bearer { .. } => Some(Scheme::Bearer),
        }
    }
}

/// The authenticated principal of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Username for Basic, configured subject for Bearer, `anonymous` otherwise.
    pub subject: String,
    /// Scheme the identity was established with.
    pub scheme: Option<Scheme>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            scheme: None,
        }
    }
}

/// Validate a parsed credential against a policy.
pub fn validate(credential: &Credential, policy: &SchemePolicy) -> Result<Identity, AuthError> {
    match (policy, credential) {
        (SchemePolicy::Anonymous, _) => Ok(Identity::anonymous()),
        (_, Credential::None) => Err(AuthError::MissingCredential),
        (
            SchemePolicy::Basic {
                username: expected_user,
                password: expected_pass,
            },
            Credential::Basic { username, password },
        ) => {
            // Evaluate both comparisons so a wrong username costs as much as a
            // wrong password.
            let user_ok = secrets_match(username, expected_user);
            let pass_ok = secrets_match(password, expected_pass);
            if user_ok & pass_ok {
                Ok(Identity {
                    subject: username.clone(),
                    scheme: Some(Scheme::Basic),
                })
            } else {
                Err(AuthError::InvalidCredential(
                    "invalid user or password".to_string(),
                ))
            }
        }
        (SchemePolicy::Bearer { token: expected, subject }, Credential::Bearer { token })
        | (
            SchemePolicy::Bearer { token: expected, subject },
            Credential::OAuth2 {
                access_token: token,
            },
        ) => {
            if secrets_match(token, expected) {
                Ok(Identity {
                    subject: subject.clone(),
                    scheme: Some(Scheme::Bearer),
                })
            } else {
                Err(AuthError::InvalidCredential("invalid token".to_string()))
            }
        }
        (policy, credential) => Err(AuthError::SchemeMismatch(format!(
            "expected {} credential, got {}",
            policy.scheme().map(|s| s.as_str()).unwrap_or("no"),
            credential.scheme().map(|s| s.as_str()).unwrap_or("none"),
        ))),
    }
}

/// Read the credential carried by call metadata for a route's policy.
///
/// The header's scheme prefix is checked against the policy before its
/// payload is decoded, so a Bearer token sent to a Basic route is a scheme
/// mismatch rather than a decoding failure. Anonymous routes yield
/// `Credential::None` without looking at the metadata.
pub fn extract_credential(
    metadata: &Metadata,
    policy: &SchemePolicy,
) -> Result<Credential, AuthError> {
    let Some(expected) = policy.scheme() else {
        return Ok(Credential::None);
    };

    let header = metadata::authorization(metadata)?;
    let prefix = format!("{} ", expected.as_str());
    if !header.starts_with(&prefix) {
        return Err(AuthError::SchemeMismatch(format!(
            "missing \"{}\" prefix in \"authorization\" header",
            prefix
        )));
    }

    parse_credential(header)
}

/// Extract, parse, and validate the credential carried by call metadata.
pub fn authenticate(metadata: &Metadata, policy: &SchemePolicy) -> Result<Identity, AuthError> {
    let credential = extract_credential(metadata, policy)?;
    validate(&credential, policy)
}

/// Compare two secrets without an early exit on the first differing byte.
///
/// Both sides are hashed first so the comparison length is fixed and does
/// not reveal the configured secret's length.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    constant_time_eq(provided.as_slice(), expected.as_slice())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

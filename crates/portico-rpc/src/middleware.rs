// crates/portico-rpc/src/middleware.rs
//
// Interceptor stages for the RPC server and clients: authentication,
// credential attachment, logging/timing, and default deadlines.
//
// Stages are assembled into a `Chain` by name so the order can come from
// configuration. The reference ordering is `[credentials, logging]` on the
// client side and `[logging, auth]` on the server side.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use portico_core::call::{Call, Reply};
use portico_core::chain::{Chain, Next, Stage};
use portico_core::credential::{self, Credential, SchemePolicy};
use portico_core::error::RpcError;
use portico_core::metadata::{AUTHORIZATION, IDENTITY, REQUEST_ID};

/// Stage names accepted by [`build_chain`].
pub const AUTH: &str = "auth";
pub const CREDENTIALS: &str = "credentials";
pub const LOGGING: &str = "logging";
pub const DEADLINE: &str = "deadline";

// ---------------------------------------------------------------------------
// AuthStage
// ---------------------------------------------------------------------------

/// Server stage: validates the call's credential against a policy.
///
/// On success the identity is recorded on the call and its subject is
/// injected as `x-portico-identity` metadata for later stages and handlers.
#[derive(Debug, Clone)]
pub struct AuthStage {
    policy: SchemePolicy,
}

impl AuthStage {
    pub fn new(policy: SchemePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &str {
        AUTH
    }

    async fn wrap(&self, mut call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
        let identity = credential::authenticate(&call.metadata, &self.policy).map_err(|e| {
            tracing::debug!("Rejected credential for {}: {} ({})", call.method, e, e.tag());
            e
        })?;
        call.metadata.insert(IDENTITY, identity.subject.clone());
        call.identity = Some(identity);
        next.run(call).await
    }
}

// ---------------------------------------------------------------------------
// CredentialStage
// ---------------------------------------------------------------------------

/// Client stage: attaches a credential as the `authorization` header.
///
/// A credential already present on the call is left in place, so a gateway
/// forwarding its caller's header keeps that caller's identity.
#[derive(Debug, Clone)]
pub struct CredentialStage {
    credential: Credential,
}

impl CredentialStage {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl Stage for CredentialStage {
    fn name(&self) -> &str {
        CREDENTIALS
    }

    async fn wrap(&self, mut call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
        if !call.metadata.contains_key(AUTHORIZATION) {
            if let Some(header) = self.credential.to_header() {
                call.metadata.insert(AUTHORIZATION, header);
            }
        }
        next.run(call).await
    }
}

// ---------------------------------------------------------------------------
// LoggingStage
// ---------------------------------------------------------------------------

/// Which end of a connection a chain runs on; used as a log label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn label(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Logs method, duration, and outcome of every call.
///
/// Assigns an `x-request-id` when the call has none. For streaming calls the
/// duration covers stream establishment only.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    side: Side,
}

impl LoggingStage {
    pub fn new(side: Side) -> Self {
        Self { side }
    }
}

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &str {
        LOGGING
    }

    async fn wrap(&self, mut call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
        let request_id = match call.metadata.get(REQUEST_ID) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::now_v7().to_string();
                call.metadata.insert(REQUEST_ID, id.clone());
                id
            }
        };
        let method = call.method.clone();
        let shape = call.shape;
        let started = Instant::now();

        let result = next.run(call).await;

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => tracing::info!(
                "[{}] {} ({}) ok in {:?} request_id={}",
                self.side.label(),
                method,
                shape,
                elapsed,
                request_id
            ),
            Err(e) => tracing::warn!(
                "[{}] {} ({}) failed in {:?} request_id={}: {}",
                self.side.label(),
                method,
                shape,
                elapsed,
                request_id,
                e
            ),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// DeadlineStage
// ---------------------------------------------------------------------------

/// Client stage: gives calls without a deadline a default timeout.
#[derive(Debug, Clone)]
pub struct DeadlineStage {
    default_timeout: Duration,
}

impl DeadlineStage {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait]
impl Stage for DeadlineStage {
    fn name(&self) -> &str {
        DEADLINE
    }

    async fn wrap(&self, mut call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
        if call.deadline.is_none() {
            call.deadline = Some(tokio::time::Instant::now() + self.default_timeout);
        }
        next.run(call).await
    }
}

// ---------------------------------------------------------------------------
// Chain assembly
// ---------------------------------------------------------------------------

/// Inputs the named stages are built from.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub side: Side,
    pub policy: SchemePolicy,
    pub credential: Credential,
    pub default_timeout: Duration,
}

impl StageConfig {
    pub fn server(policy: SchemePolicy) -> Self {
        Self {
            side: Side::Server,
            policy,
            credential: Credential::None,
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn client(credential: Credential, default_timeout: Duration) -> Self {
        Self {
            side: Side::Client,
            policy: SchemePolicy::Anonymous,
            credential,
            default_timeout,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainConfigError {
    #[error("unknown interceptor stage \"{0}\"")]
    UnknownStage(String),
    #[error("interceptor stage \"{0}\" listed more than once")]
    DuplicateStage(String),
}

/// Build a chain from stage names in execution order.
pub fn build_chain<S: AsRef<str>>(
    names: &[S],
    config: &StageConfig,
) -> Result<Chain, ChainConfigError> {
    let mut builder = Chain::builder();
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        let name = name.as_ref();
        if seen.contains(&name) {
            return Err(ChainConfigError::DuplicateStage(name.to_string()));
        }
        seen.push(name);
        builder = match name {
            AUTH => builder.stage(AuthStage::new(config.policy.clone())),
            CREDENTIALS => builder.stage(CredentialStage::new(config.credential.clone())),
            LOGGING => builder.stage(LoggingStage::new(config.side)),
            DEADLINE => builder.stage(DeadlineStage::new(config.default_timeout)),
            other => return Err(ChainConfigError::UnknownStage(other.to_string())),
        };
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::error::AuthError;
    use portico_core::metadata::Metadata;
    use portico_core::traits::Invoker;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Terminal that remembers the last call's metadata and deadline.
    #[derive(Default)]
    struct Capture {
        metadata: Mutex<Option<Metadata>>,
        had_deadline: Mutex<bool>,
        subject: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Invoker for Capture {
        async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
            *self.had_deadline.lock().unwrap() = call.deadline.is_some();
            *self.subject.lock().unwrap() = call.identity.as_ref().map(|i| i.subject.clone());
            *self.metadata.lock().unwrap() = Some(call.metadata);
            Ok(Reply::Unary(Value::Null))
        }
    }

    fn bearer_policy() -> SchemePolicy {
        SchemePolicy::Bearer {
            token: "some-secret-token".to_string(),
            subject: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn client_credentials_satisfy_server_auth() {
        let client = build_chain(
            &[CREDENTIALS],
            &StageConfig::client(
                Credential::Bearer {
                    token: "some-secret-token".to_string(),
                },
                Duration::from_secs(5),
            ),
        )
        .unwrap();
        let server = build_chain(&[LOGGING, AUTH], &StageConfig::server(bearer_policy())).unwrap();

        // The client chain's terminal feeds the server chain.
        struct Loopback<'a> {
            server: &'a Chain,
            terminal: &'a Capture,
        }

        #[async_trait]
        impl Invoker for Loopback<'_> {
            async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
                self.server.invoke(call, self.terminal).await
            }
        }

        let capture = Capture::default();
        let loopback = Loopback {
            server: &server,
            terminal: &capture,
        };
        client
            .invoke(Call::unary("/portico.echo.Echo/UnaryEcho", json!({})), &loopback)
            .await
            .expect("authenticated");

        let metadata = capture.metadata.lock().unwrap().clone().unwrap();
        assert_eq!(metadata.get(IDENTITY), Some("token"));
        assert!(metadata.get(REQUEST_ID).is_some());
        assert_eq!(capture.subject.lock().unwrap().as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn auth_stage_rejects_before_terminal() {
        let chain = build_chain(&[LOGGING, AUTH], &StageConfig::server(bearer_policy())).unwrap();
        let capture = Capture::default();

        let result = chain.invoke(Call::unary("/svc/M", json!({})), &capture).await;

        assert_eq!(result.err(), Some(RpcError::Unauthenticated(AuthError::MissingCredential)));
        assert!(capture.metadata.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn credential_stage_keeps_forwarded_header() {
        let chain = build_chain(
            &[CREDENTIALS],
            &StageConfig::client(
                Credential::Bearer {
                    token: "gateway".to_string(),
                },
                Duration::from_secs(5),
            ),
        )
        .unwrap();
        let capture = Capture::default();
        let metadata: Metadata = [(AUTHORIZATION, "Bearer caller")].into_iter().collect();

        chain
            .invoke(Call::unary("/svc/M", json!({})).with_metadata(metadata), &capture)
            .await
            .unwrap();

        let seen = capture.metadata.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get(AUTHORIZATION), Some("Bearer caller"));
    }

    #[tokio::test]
    async fn logging_keeps_existing_request_id() {
        let chain = build_chain(&[LOGGING], &StageConfig::server(SchemePolicy::Anonymous)).unwrap();
        let capture = Capture::default();
        let metadata: Metadata = [(REQUEST_ID, "abc")].into_iter().collect();

        chain
            .invoke(Call::unary("/svc/M", json!({})).with_metadata(metadata), &capture)
            .await
            .unwrap();

        let seen = capture.metadata.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get_all(REQUEST_ID), ["abc".to_string()]);
    }

    #[tokio::test]
    async fn deadline_stage_fills_missing_deadline() {
        let chain = build_chain(
            &[DEADLINE],
            &StageConfig::client(Credential::None, Duration::from_secs(1)),
        )
        .unwrap();
        let capture = Capture::default();
        chain
            .invoke(Call::unary("/svc/M", json!({})), &capture)
            .await
            .unwrap();
        assert!(*capture.had_deadline.lock().unwrap());
    }

    #[test]
    fn build_chain_validates_names() {
        let config = StageConfig::server(SchemePolicy::Anonymous);
        let chain = build_chain(&["logging", "auth"], &config).unwrap();
        assert_eq!(chain.names(), vec!["logging", "auth"]);

        assert_eq!(
            build_chain(&["logging", "metrics"], &config).err(),
            Some(ChainConfigError::UnknownStage("metrics".to_string()))
        );
        assert_eq!(
            build_chain(&["auth", "auth"], &config).err(),
            Some(ChainConfigError::DuplicateStage("auth".to_string()))
        );
    }
}

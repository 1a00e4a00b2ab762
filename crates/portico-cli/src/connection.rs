// crates/portico-cli/src/connection.rs
//
// Builds the RPC client every command shares: endpoint, TLS trust, the
// credential to present, and the client interceptor chain.

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use thiserror::Error;

use portico_core::credential::Credential;
use portico_rpc::middleware::{build_chain, StageConfig, CREDENTIALS, DEADLINE, LOGGING};
use portico_rpc::tls::{install_crypto_provider, load_ca_pem};
use portico_rpc::{ClientTls, RpcClient};

/// Credential scheme presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    None,
    Basic,
    Bearer,
    Oauth2,
}

impl AuthMode {
    fn label(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Basic => "basic",
            AuthMode::Bearer => "bearer",
            AuthMode::Oauth2 => "oauth2",
        }
    }
}

/// Everything needed to reach a daemon.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub addr: String,
    pub cacert: String,
    pub domain: String,
    pub plaintext: bool,
    pub auth: AuthMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("--auth {0} requires --{1}")]
    Missing(&'static str, &'static str),
}

/// Build the credential selected by `--auth`.
pub fn credential(opts: &ConnectOptions) -> Result<Credential, CredentialError> {
    let required = |value: &Option<String>, flag: &'static str| {
        value
            .clone()
            .ok_or(CredentialError::Missing(opts.auth.label(), flag))
    };
    match opts.auth {
        AuthMode::None => Ok(Credential::None),
        AuthMode::Basic => Ok(Credential::Basic {
            username: required(&opts.username, "username")?,
            password: required(&opts.password, "password")?,
        }),
        AuthMode::Bearer => Ok(Credential::Bearer {
            token: required(&opts.token, "token")?,
        }),
        AuthMode::Oauth2 => Ok(Credential::OAuth2 {
            access_token: required(&opts.token, "token")?,
        }),
    }
}

/// Connect to the daemon with the client chain `[credentials, logging, deadline]`.
pub async fn connect(opts: &ConnectOptions) -> Result<RpcClient, Box<dyn std::error::Error>> {
    let credential = credential(opts)?;

    let tls = if opts.plaintext {
        None
    } else {
        install_crypto_provider();
        let ca_pem = load_ca_pem(Path::new(&expand_tilde(&opts.cacert)))?;
        Some(ClientTls {
            ca_pem,
            domain: Some(opts.domain.clone()),
        })
    };

    let chain = build_chain(
        &[CREDENTIALS, LOGGING, DEADLINE],
        &StageConfig::client(credential, opts.timeout),
    )?;
    let client = RpcClient::connect(&opts.addr, tls)
        .await
        .map_err(|e| format!("Could not connect to {}: {}", opts.addr, e))?;
    Ok(client.with_chain(chain))
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(auth: AuthMode) -> ConnectOptions {
        ConnectOptions {
            addr: "127.0.0.1:50051".to_string(),
            cacert: "~/.portico/certs/ca.crt".to_string(),
            domain: "localhost".to_string(),
            plaintext: true,
            auth,
            username: None,
            password: None,
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn basic_needs_username_and_password() {
        let mut opts = options(AuthMode::Basic);
        assert_eq!(
            credential(&opts),
            Err(CredentialError::Missing("basic", "username"))
        );
        opts.username = Some("admin".to_string());
        assert_eq!(
            credential(&opts),
            Err(CredentialError::Missing("basic", "password"))
        );
        opts.password = Some("password".to_string());
        assert_eq!(
            credential(&opts).unwrap().to_header().unwrap(),
            "Basic YWRtaW46cGFzc3dvcmQ="
        );
    }

    #[test]
    fn token_schemes_send_bearer() {
        let mut opts = options(AuthMode::Oauth2);
        assert_eq!(
            credential(&opts),
            Err(CredentialError::Missing("oauth2", "token"))
        );
        opts.token = Some("some-secret-token".to_string());
        assert_eq!(
            credential(&opts).unwrap().to_header().unwrap(),
            "Bearer some-secret-token"
        );

        opts.auth = AuthMode::Bearer;
        assert!(matches!(credential(&opts), Ok(Credential::Bearer { .. })));
    }

    #[test]
    fn none_sends_nothing() {
        assert_eq!(credential(&options(AuthMode::None)), Ok(Credential::None));
    }

    #[tokio::test]
    async fn missing_ca_file_fails_before_dialing() {
        let mut opts = options(AuthMode::None);
        opts.plaintext = false;
        opts.cacert = "/nonexistent/portico/ca.crt".to_string();
        let err = connect(&opts).await.unwrap_err();
        assert!(err.to_string().contains("ca.crt"));
    }
}

// crates/portico-daemon/src/config.rs
//
// Runtime configuration for the Portico daemon.
// Loaded from a TOML file or populated with sensible defaults.

use std::fs;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use portico_core::credential::SchemePolicy;
use portico_rpc::handlers::EchoOptions;
use portico_rpc::middleware::{AUTH, DEADLINE, LOGGING};
use portico_rpc::GatewayConfig;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Host address for the listener.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the listener. Native RPC and REST share it.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve without TLS. Intended for local testing only.
    #[serde(default)]
    pub plaintext: bool,

    /// PEM certificate chain presented by the listener.
    #[serde(default = "default_cert_file")]
    pub cert_file: String,

    /// PEM private key for `cert_file`.
    #[serde(default = "default_key_file")]
    pub key_file: String,

    /// CA bundle the gateway uses to verify the listener when dialing it.
    #[serde(default = "default_ca_file")]
    pub ca_file: String,

    /// Server name the gateway expects in the listener's certificate.
    #[serde(default = "default_tls_domain")]
    pub tls_domain: String,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding `swagger.json` and `swagger-ui/`.
    /// When unset, documentation requests get 404.
    #[serde(default)]
    pub assets_dir: Option<String>,

    /// UnaryEcho message length limit; 0 disables the check.
    #[serde(default = "default_echo_max_message_len")]
    pub echo_max_message_len: usize,

    /// Artificial delay before each UnaryEcho reply, for deadline demos.
    #[serde(default)]
    pub echo_delay_ms: u64,

    /// Server interceptor order.
    #[serde(default = "default_server_interceptors")]
    pub server_interceptors: Vec<String>,

    /// Interceptor order on the gateway's client toward the RPC core.
    #[serde(default = "default_gateway_interceptors")]
    pub gateway_interceptors: Vec<String>,

    /// Authentication policy, e.g. `[auth] scheme = "basic"`.
    #[serde(default)]
    pub auth: SchemePolicy,

    /// REST transcoding limits and routes.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_cert_file() -> String {
    "~/.portico/certs/server.crt".to_string()
}

fn default_key_file() -> String {
    "~/.portico/certs/server.key".to_string()
}

fn default_ca_file() -> String {
    "~/.portico/certs/ca.crt".to_string()
}

fn default_tls_domain() -> String {
    "localhost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_echo_max_message_len() -> usize {
    10
}

fn default_server_interceptors() -> Vec<String> {
    vec![LOGGING.to_string(), AUTH.to_string()]
}

fn default_gateway_interceptors() -> Vec<String> {
    vec![LOGGING.to_string(), DEADLINE.to_string()]
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            plaintext: false,
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            ca_file: default_ca_file(),
            tls_domain: default_tls_domain(),
            log_level: default_log_level(),
            assets_dir: None,
            echo_max_message_len: default_echo_max_message_len(),
            echo_delay_ms: 0,
            server_interceptors: default_server_interceptors(),
            gateway_interceptors: default_gateway_interceptors(),
            auth: SchemePolicy::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// A configuration that parsed but cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be non-zero")]
    ZeroPort,

    #[error("server interceptors must include \"{0}\"")]
    MissingAuthStage(&'static str),

    #[error("{0} is required unless plaintext is enabled")]
    MissingTlsSetting(&'static str),
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// A leading `~/` is expanded to the home directory.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(expand_tilde(path))?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject settings the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if !self.server_interceptors.iter().any(|s| s == AUTH) {
            return Err(ConfigError::MissingAuthStage(AUTH));
        }
        if !self.plaintext {
            if self.cert_file.is_empty() {
                return Err(ConfigError::MissingTlsSetting("cert_file"));
            }
            if self.key_file.is_empty() {
                return Err(ConfigError::MissingTlsSetting("key_file"));
            }
            if self.ca_file.is_empty() {
                return Err(ConfigError::MissingTlsSetting("ca_file"));
            }
        }
        Ok(())
    }

    pub fn echo_options(&self) -> EchoOptions {
        EchoOptions {
            max_message_len: (self.echo_max_message_len > 0).then_some(self.echo_max_message_len),
            delay: Duration::from_millis(self.echo_delay_ms),
        }
    }

    /// Address the gateway dials to reach this daemon's own listener.
    ///
    /// Wildcard binds are reached over loopback.
    pub fn self_address(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" | "[::]" => "[::1]",
            other => other,
        };
        format!("{}:{}", host, self.port)
    }
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

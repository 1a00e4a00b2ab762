// crates/portico-daemon/src/main.rs
//
// Binary entrypoint for the Portico daemon.
//
// Parses CLI arguments, loads configuration, initializes tracing, wires the
// user store, services, interceptor chains, and gateway, then serves native
// RPC, REST, and documentation assets on a single endpoint.

mod config;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use config::{expand_tilde, DaemonConfig};

use portico_core::credential::{Credential, SchemePolicy};
use portico_core::traits::UserStore;
use portico_rpc::handlers;
use portico_rpc::middleware::{build_chain, StageConfig};
use portico_rpc::tls::{install_crypto_provider, load_ca_pem, load_server_config};
use portico_rpc::{
    ClientTls, Gateway, PorticoServer, RpcClient, RpcConfig, RpcCore, ServiceRegistry,
    StaticAssets,
};
use portico_store::InMemoryUserStore;

/// Portico daemon: one endpoint for native RPC and REST.
#[derive(Parser, Debug)]
#[command(name = "portico-daemon", version = "0.1.0", about = "Portico RPC gateway daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.portico/config.toml")]
    config: String,

    /// Host to bind, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Server certificate (PEM).
    #[arg(long)]
    certfile: Option<String>,

    /// Server private key (PEM).
    #[arg(long)]
    keyfile: Option<String>,

    /// CA bundle used by the gateway to verify the listener.
    #[arg(long)]
    cacert: Option<String>,

    /// Serve without TLS.
    #[arg(long)]
    plaintext: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The configured log level seeds the filter, so the file is read before
    // tracing is up and the outcome is logged afterwards.
    let loaded = DaemonConfig::load(&args.config);
    let log_level = match &loaded {
        Ok(cfg) => cfg.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let mut daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                args.config,
                e
            );
            DaemonConfig::default()
        }
    };

    // CLI flags override the config file values.
    if let Some(host) = args.host {
        daemon_config.host = host;
    }
    if let Some(port) = args.port {
        daemon_config.port = port;
    }
    if let Some(certfile) = args.certfile {
        daemon_config.cert_file = certfile;
    }
    if let Some(keyfile) = args.keyfile {
        daemon_config.key_file = keyfile;
    }
    if let Some(cacert) = args.cacert {
        daemon_config.ca_file = cacert;
    }
    if args.plaintext {
        daemon_config.plaintext = true;
    }
    daemon_config.validate()?;

    tracing::info!("Portico daemon v0.1.0");
    tracing::info!(
        "Endpoint: {}:{} ({})",
        daemon_config.host,
        daemon_config.port,
        if daemon_config.plaintext { "plaintext" } else { "tls" }
    );
    tracing::info!("Server interceptors: {:?}", daemon_config.server_interceptors);
    tracing::info!("Gateway interceptors: {:?}", daemon_config.gateway_interceptors);

    install_crypto_provider();

    // ---------------------------------------------------------------
    // RPC core: services and the server chain.
    // ---------------------------------------------------------------
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let mut registry = ServiceRegistry::new();
    handlers::register_all(&mut registry, daemon_config.echo_options(), users);

    if daemon_config.auth == SchemePolicy::Anonymous {
        tracing::warn!("Authentication policy is anonymous; every call will be accepted");
    } else {
        tracing::info!("Authentication policy: {:?}", daemon_config.auth);
    }
    let server_chain = build_chain(
        &daemon_config.server_interceptors,
        &StageConfig::server(daemon_config.auth.clone()),
    )?;
    let core = RpcCore::new(registry, server_chain);

    // ---------------------------------------------------------------
    // Gateway: a client of this daemon's own endpoint.
    // ---------------------------------------------------------------
    let client_tls = if daemon_config.plaintext {
        None
    } else {
        let ca_pem = load_ca_pem(Path::new(&expand_tilde(&daemon_config.ca_file)))?;
        Some(ClientTls {
            ca_pem,
            domain: Some(daemon_config.tls_domain.clone()),
        })
    };
    let gateway_chain = build_chain(
        &daemon_config.gateway_interceptors,
        &StageConfig::client(Credential::None, daemon_config.gateway.default_timeout()),
    )?;
    let upstream =
        RpcClient::connect_lazy(&daemon_config.self_address(), client_tls)?.with_chain(gateway_chain);
    let gateway = Gateway::new(daemon_config.gateway.clone(), Arc::new(upstream))?;
    tracing::info!("Gateway serving {} REST routes", gateway.routes().count());

    // ---------------------------------------------------------------
    // Listener.
    // ---------------------------------------------------------------
    let rpc_config = RpcConfig {
        host: daemon_config.host.clone(),
        port: daemon_config.port,
    };
    let mut server = PorticoServer::new(rpc_config, core).with_gateway(gateway);

    if let Some(dir) = &daemon_config.assets_dir {
        let dir = expand_tilde(dir);
        tracing::info!("Serving documentation assets from {}", dir);
        server = server.with_assets(StaticAssets::new(dir));
    }

    if daemon_config.plaintext {
        tracing::warn!("TLS disabled; credentials will travel in cleartext");
    } else {
        let tls = load_server_config(
            Path::new(&expand_tilde(&daemon_config.cert_file)),
            Path::new(&expand_tilde(&daemon_config.key_file)),
        )?;
        server = server.with_tls(tls);
    }

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

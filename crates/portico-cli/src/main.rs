// crates/portico-cli/src/main.rs
//
// CLI entrypoint for the Portico client.
//
// Connects to a portico-daemon over native RPC and exercises every call
// shape and credential scheme the daemon supports.

mod commands;
mod connection;
mod output;

use std::time::Duration;

use clap::{Parser, Subcommand};
use commands::echo::EchoCmd;
use commands::greet::GreetCmd;
use commands::math::MathCmd;
use commands::user::UserCmd;
use connection::{AuthMode, ConnectOptions};
use output::OutputFormat;

/// Portico CLI: a native RPC client for the Portico daemon.
#[derive(Parser, Debug)]
#[command(name = "portico", version = "0.1.0", about = "Native RPC client for the Portico daemon")]
struct Cli {
    /// Daemon address (host:port or a full URI).
    #[arg(long, global = true, default_value = "127.0.0.1:50051")]
    addr: String,

    /// CA bundle used to verify the daemon's certificate.
    #[arg(long, global = true, default_value = "~/.portico/certs/ca.crt")]
    cacert: String,

    /// Server name expected in the daemon's certificate.
    #[arg(long, global = true, default_value = "localhost")]
    domain: String,

    /// Connect without TLS.
    #[arg(long, global = true)]
    plaintext: bool,

    /// Credential scheme to present.
    #[arg(long, global = true, value_enum, default_value = "none")]
    auth: AuthMode,

    /// Username for `--auth basic`.
    #[arg(long, global = true)]
    username: Option<String>,

    /// Password for `--auth basic`.
    #[arg(long, global = true)]
    password: Option<String>,

    /// Token for `--auth bearer` and `--auth oauth2`.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Per-call deadline in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Echo service: one subcommand per call shape.
    #[command(subcommand)]
    Echo(EchoCmd),

    /// Math service: sum, prime factors, average, maximum.
    #[command(subcommand)]
    Math(MathCmd),

    /// Greeter service.
    Greet(GreetCmd),

    /// User service: create and get.
    #[command(subcommand)]
    User(UserCmd),
}

impl Cli {
    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            addr: self.addr.clone(),
            cacert: self.cacert.clone(),
            domain: self.domain.clone(),
            plaintext: self.plaintext,
            auth: self.auth,
            username: self.username.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Quiet by default; RUST_LOG=info shows the client chain's call log.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = connection::connect(&cli.connect_options()).await?;

    match &cli.command {
        Commands::Echo(cmd) => commands::echo::run(cmd, &client, cli.output).await?,
        Commands::Math(cmd) => commands::math::run(cmd, &client, cli.output).await?,
        Commands::Greet(cmd) => commands::greet::run(cmd, &client, cli.output).await?,
        Commands::User(cmd) => commands::user::run(cmd, &client, cli.output).await?,
    }

    Ok(())
}

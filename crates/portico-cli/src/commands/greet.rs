// crates/portico-cli/src/commands/greet.rs
//
// `portico greet <name>`: call Greeter.SayHello.

use clap::Args;

use portico_rpc::handlers::greet::{HelloReply, HelloRequest, SAY_HELLO};
use portico_rpc::RpcClient;

use crate::output::{format_json, OutputFormat};

#[derive(Debug, Args)]
pub struct GreetCmd {
    /// Name to greet.
    pub name: String,
}

/// Run the greet command.
pub async fn run(
    cmd: &GreetCmd,
    client: &RpcClient,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let reply: HelloReply = client
        .unary(
            SAY_HELLO,
            &HelloRequest {
                name: cmd.name.clone(),
            },
        )
        .await?;

    match format {
        OutputFormat::Table => println!("{}", reply.message),
        OutputFormat::Json => println!("{}", format_json(&reply)),
    }
    Ok(())
}

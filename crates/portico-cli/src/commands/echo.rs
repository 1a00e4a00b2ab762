// crates/portico-cli/src/commands/echo.rs
//
// `portico echo {unary, server-stream, client-stream, bidi}`: one command per
// call shape of the echo service.

use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use portico_core::call::{collect_stream, stream_from_iter, Call};
use portico_rpc::client::decode_reply;
use portico_rpc::handlers::echo::{
    EchoRequest, EchoResponse, BIDIRECTIONAL_STREAMING_ECHO, CLIENT_STREAMING_ECHO,
    SERVER_STREAMING_ECHO, UNARY_ECHO,
};
use portico_rpc::RpcClient;

use crate::output::{render, OutputFormat};

/// Echo subcommands.
#[derive(Debug, Subcommand)]
pub enum EchoCmd {
    /// Send one message and print the reply.
    Unary {
        message: String,
    },
    /// Send one message and print every streamed copy.
    ServerStream {
        message: String,
    },
    /// Stream several messages; the server replies once.
    ClientStream {
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Stream several messages and print each echo.
    Bidi {
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

#[derive(Tabled, Serialize)]
struct EchoRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Message")]
    message: String,
}

/// Run the echo subcommand.
pub async fn run(
    cmd: &EchoCmd,
    client: &RpcClient,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let replies: Vec<EchoResponse> = match cmd {
        EchoCmd::Unary { message } => {
            let reply: EchoResponse = client.unary(UNARY_ECHO, &request(message)).await?;
            vec![reply]
        }
        EchoCmd::ServerStream { message } => {
            let input = serde_json::to_value(request(message))?;
            let reply = client
                .call(Call::server_streaming(SERVER_STREAMING_ECHO, input))
                .await?;
            decode_all(collect_stream(reply.into_stream(), None).await?)?
        }
        EchoCmd::ClientStream { messages } => {
            let reply = client
                .call(Call::client_streaming(
                    CLIENT_STREAMING_ECHO,
                    stream_from_iter(requests(messages)?),
                ))
                .await?;
            vec![decode_reply(reply.into_unary()?)?]
        }
        EchoCmd::Bidi { messages } => {
            let reply = client
                .call(Call::bidirectional(
                    BIDIRECTIONAL_STREAMING_ECHO,
                    stream_from_iter(requests(messages)?),
                ))
                .await?;
            decode_all(collect_stream(reply.into_stream(), None).await?)?
        }
    };

    let rows: Vec<EchoRow> = replies
        .into_iter()
        .enumerate()
        .map(|(index, reply)| EchoRow {
            index: index + 1,
            message: reply.message,
        })
        .collect();
    println!("{}", render(&rows, format));
    Ok(())
}

fn request(message: &str) -> EchoRequest {
    EchoRequest {
        message: message.to_string(),
    }
}

fn requests(messages: &[String]) -> Result<Vec<Value>, serde_json::Error> {
    messages
        .iter()
        .map(|message| serde_json::to_value(request(message)))
        .collect()
}

fn decode_all(values: Vec<Value>) -> Result<Vec<EchoResponse>, portico_core::error::RpcError> {
    values.into_iter().map(decode_reply).collect()
}

// crates/portico-cli/src/commands/user.rs
//
// `portico user {create, get}`: manage records in the daemon's user store.

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use portico_core::user::User;
use portico_rpc::handlers::user::{CreateRequest, Empty, GetRequest, GetResponse, CREATE, GET};
use portico_rpc::RpcClient;

use crate::output::{render, OutputFormat};

/// User subcommands.
#[derive(Debug, Subcommand)]
pub enum UserCmd {
    /// Create or replace a user.
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Look a user up by name.
    Get { username: String },
}

#[derive(Tabled, Serialize)]
struct UserRow {
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "Password")]
    password: String,
}

/// Run the user subcommand.
pub async fn run(
    cmd: &UserCmd,
    client: &RpcClient,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        UserCmd::Create { username, password } => {
            let request = CreateRequest {
                user: User {
                    username: username.clone(),
                    password: password.clone(),
                },
            };
            let _: Empty = client.unary(CREATE, &request).await?;
            println!("Created user {}", username);
        }
        UserCmd::Get { username } => {
            let reply: GetResponse = client
                .unary(
                    GET,
                    &GetRequest {
                        username: username.clone(),
                    },
                )
                .await?;
            let rows = vec![UserRow {
                username: reply.user.username,
                password: mask(&reply.user.password),
            }];
            println!("{}", render(&rows, format));
        }
    }
    Ok(())
}

fn mask(password: &str) -> String {
    "*".repeat(password.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_hides_every_character() {
        assert_eq!(mask("123"), "***");
        assert_eq!(mask(""), "");
    }
}

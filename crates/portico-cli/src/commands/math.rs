// crates/portico-cli/src/commands/math.rs
//
// `portico math {sum, prime-factors, average, maximum}`.

use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use portico_core::call::{collect_stream, stream_from_iter, Call};
use portico_rpc::client::decode_reply;
use portico_rpc::handlers::math::{
    AverageResponse, MaximumResponse, NumberRequest, PrimeFactorsRequest, PrimeFactorsResponse,
    SumRequest, SumResponse, AVERAGE, MAXIMUM, PRIME_FACTORS, SUM,
};
use portico_rpc::RpcClient;

use crate::output::{render, OutputFormat};

/// Math subcommands.
#[derive(Debug, Subcommand)]
pub enum MathCmd {
    /// Add two integers.
    Sum {
        #[arg(allow_negative_numbers = true)]
        first: i32,
        #[arg(allow_negative_numbers = true)]
        second: i32,
    },
    /// Stream the prime factors of a number.
    PrimeFactors { num: i64 },
    /// Stream numbers and print their average.
    Average {
        #[arg(required = true, allow_negative_numbers = true)]
        nums: Vec<i32>,
    },
    /// Stream numbers and print each new running maximum.
    Maximum {
        #[arg(required = true, allow_negative_numbers = true)]
        nums: Vec<i32>,
    },
}

#[derive(Tabled, Serialize)]
struct ResultRow {
    #[tabled(rename = "Operation")]
    operation: &'static str,
    #[tabled(rename = "Result")]
    result: String,
}

/// Run the math subcommand.
pub async fn run(
    cmd: &MathCmd,
    client: &RpcClient,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = match cmd {
        MathCmd::Sum { first, second } => {
            let reply: SumResponse = client
                .unary(
                    SUM,
                    &SumRequest {
                        first_num: *first,
                        second_num: *second,
                    },
                )
                .await?;
            vec![row("sum", reply.result)]
        }
        MathCmd::PrimeFactors { num } => {
            let input = serde_json::to_value(PrimeFactorsRequest { num: *num })?;
            let reply = client
                .call(Call::server_streaming(PRIME_FACTORS, input))
                .await?;
            collect_stream(reply.into_stream(), None)
                .await?
                .into_iter()
                .map(|value| decode_reply::<PrimeFactorsResponse>(value).map(|r| row("factor", r.result)))
                .collect::<Result<Vec<_>, _>>()?
        }
        MathCmd::Average { nums } => {
            let reply = client
                .call(Call::client_streaming(AVERAGE, stream_from_iter(numbers(nums)?)))
                .await?;
            let reply: AverageResponse = decode_reply(reply.into_unary()?)?;
            vec![row("average", reply.result)]
        }
        MathCmd::Maximum { nums } => {
            let reply = client
                .call(Call::bidirectional(MAXIMUM, stream_from_iter(numbers(nums)?)))
                .await?;
            collect_stream(reply.into_stream(), None)
                .await?
                .into_iter()
                .map(|value| decode_reply::<MaximumResponse>(value).map(|r| row("maximum", r.result)))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    println!("{}", render(&rows, format));
    Ok(())
}

fn row(operation: &'static str, result: impl ToString) -> ResultRow {
    ResultRow {
        operation,
        result: result.to_string(),
    }
}

fn numbers(nums: &[i32]) -> Result<Vec<Value>, serde_json::Error> {
    nums.iter()
        .map(|num| serde_json::to_value(NumberRequest { num: *num }))
        .collect()
}

// crates/portico-rpc/src/handlers/math.rs
//
// Math service: one method per call shape.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use portico_core::error::RpcError;

use super::lenient_number;
use crate::registry::{HandlerContext, RequestStream, ResponseSender, ServiceRegistry};

pub const SUM: &str = "/portico.math.Math/Sum";
pub const PRIME_FACTORS: &str = "/portico.math.Math/PrimeFactors";
pub const AVERAGE: &str = "/portico.math.Math/Average";
pub const MAXIMUM: &str = "/portico.math.Math/Maximum";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SumRequest {
    #[serde(default, deserialize_with = "lenient_number")]
    pub first_num: i32,
    #[serde(default, deserialize_with = "lenient_number")]
    pub second_num: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SumResponse {
    pub result: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimeFactorsRequest {
    #[serde(default, deserialize_with = "lenient_number")]
    pub num: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimeFactorsResponse {
    pub result: i64,
}

/// Request message of both Average and Maximum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumberRequest {
    #[serde(default, deserialize_with = "lenient_number")]
    pub num: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AverageResponse {
    pub result: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaximumResponse {
    pub result: i32,
}

/// Trial divisions the PrimeFactors handler runs between yields.
const TRIAL_DIVISIONS_PER_YIELD: u32 = 4096;

/// Prime factors of `num` in ascending order, with repetition.
/// Numbers below 2 have none.
pub fn prime_factors(num: i64) -> Vec<i64> {
    let mut factorizer = Factorizer::new(num);
    let mut factors = Vec::new();
    loop {
        match factorizer.step(u32::MAX) {
            Step::Factor(factor) => factors.push(factor),
            Step::Pending => continue,
            Step::Done => return factors,
        }
    }
}

/// Incremental trial division, resumable between bounded steps.
#[derive(Debug)]
struct Factorizer {
    num: i64,
    factor: i64,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Factor(i64),
    /// The division budget ran out before the next factor was found.
    Pending,
    Done,
}

impl Factorizer {
    fn new(num: i64) -> Self {
        Self { num, factor: 2 }
    }

    /// Run at most `budget` trial divisions looking for the next factor.
    fn step(&mut self, budget: u32) -> Step {
        for _ in 0..budget {
            if self.num <= 1 {
                return Step::Done;
            }
            if self.factor.saturating_mul(self.factor) > self.num {
                let last = self.num;
                self.num = 1;
                return Step::Factor(last);
            }
            if self.num % self.factor == 0 {
                self.num /= self.factor;
                return Step::Factor(self.factor);
            }
            self.factor += 1;
        }
        Step::Pending
    }
}

pub fn register(registry: &mut ServiceRegistry) {
    registry
        .unary(SUM, |_ctx: HandlerContext, req: SumRequest| async move {
            let result = req.first_num.checked_add(req.second_num).ok_or_else(|| {
                RpcError::InvalidArgument(format!(
                    "{} + {} overflows a 32-bit result",
                    req.first_num, req.second_num
                ))
            })?;
            Ok::<_, RpcError>(SumResponse { result })
        })
        .server_streaming(
            PRIME_FACTORS,
            |ctx: HandlerContext, req: PrimeFactorsRequest, sender: ResponseSender| async move {
                // Large primes take billions of divisions; yield between
                // budgets so the deadline and other calls get the worker.
                let mut factorizer = Factorizer::new(req.num);
                loop {
                    match factorizer.step(TRIAL_DIVISIONS_PER_YIELD) {
                        Step::Factor(result) => sender.send(PrimeFactorsResponse { result }).await?,
                        Step::Done => return Ok::<_, RpcError>(()),
                        Step::Pending => {
                            if ctx.cancel.is_cancelled() {
                                return Err(RpcError::Cancelled);
                            }
                            if ctx.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                                return Err(RpcError::DeadlineExceeded);
                            }
                            tokio::task::yield_now().await;
                        }
                    }
                }
            },
        )
        .client_streaming(AVERAGE, |_ctx: HandlerContext, mut requests: RequestStream| async move {
            let mut sum = 0i64;
            let mut count = 0u64;
            while let Some(req) = requests.message::<NumberRequest>().await? {
                sum += i64::from(req.num);
                count += 1;
            }
            if count == 0 {
                return Err(RpcError::InvalidArgument(
                    "cannot average an empty stream".to_string(),
                ));
            }
            Ok(AverageResponse {
                result: sum as f64 / count as f64,
            })
        })
        .bidirectional(
            MAXIMUM,
            |_ctx: HandlerContext, mut requests: RequestStream, sender: ResponseSender| async move {
                // Emits only when a new maximum arrives.
                let mut maximum: Option<i32> = None;
                while let Some(req) = requests.message::<NumberRequest>().await? {
                    if maximum.map_or(true, |max| req.num > max) {
                        maximum = Some(req.num);
                        sender.send(MaximumResponse { result: req.num }).await?;
                    }
                }
                Ok::<_, RpcError>(())
            },
        );
}

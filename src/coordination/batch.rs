//! Sequential batch of nonces

use super::engine::{IterationOrchestrator, IterationState};
use crate::chain::ChainClient;
use crate::config::BatchConfig;
use crate::error::PacerResult;

use ethers::types::U256;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub confirmed: u64,
    pub elapsed: Duration,
    /// Final price of the last confirmed transaction
    pub last_price: U256,
}

/// Runs the orchestrator `target` times, one nonce at a time
pub struct BatchDriver<C: ChainClient> {
    orchestrator: IterationOrchestrator<C>,
    target: u64,
    base_price: U256,
}

impl<C: ChainClient> BatchDriver<C> {
    pub fn new(orchestrator: IterationOrchestrator<C>, target: u64, base_price: U256) -> Self {
        Self {
            orchestrator,
            target,
            base_price,
        }
    }

    /// Confirm `target` transactions; the first error aborts the batch
    pub async fn run(&mut self) -> PacerResult<BatchSummary> {
        let global_start = Instant::now();
        self.orchestrator.log_mut().started();
        info!(
            "Starting batch of {} transactions at base price {}",
            self.target, self.base_price
        );

        let mut current_price = self.base_price;
        let mut last_duration = Duration::ZERO;

        for index in 0..self.target {
            let state = IterationState {
                index,
                current_price,
                global_start,
                last_duration,
            };
            let outcome = self.orchestrator.run_iteration(&state).await?;

            current_price = outcome.result.final_price;
            last_duration = outcome.elapsed;
        }

        let elapsed = global_start.elapsed();
        self.orchestrator.log_mut().finished(self.target, elapsed);
        info!("Batch of {} finished in {:.1}s", self.target, elapsed.as_secs_f64());

        Ok(BatchSummary {
            confirmed: self.target,
            elapsed,
            last_price: current_price,
        })
    }
}

/// Configured base price, or a tenth of the node's price; clamped to the cap
pub async fn resolve_base_price<C: ChainClient + ?Sized>(
    client: &C,
    batch: &BatchConfig,
) -> PacerResult<U256> {
    let price = match batch.base_gas_price {
        Some(price) => U256::from(price),
        None => client.gas_price().await? / 10,
    };

    Ok(match batch.max_gas_price() {
        Some(max) => price.min(max),
        None => price,
    })
}

//! Gas price stepping and throughput pacing

use ethers::types::U256;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Price step applied by escalation and pacing, in percent
const STEP_PERCENT: u64 = 10;

/// Raise a price by one step, never by less than one wei
pub fn bump(price: U256) -> U256 {
    let step = price * STEP_PERCENT / 100;
    price + step.max(U256::one())
}

/// Lower a price by one step (floor of a tenth)
pub fn discount(price: U256) -> U256 {
    price - price * STEP_PERCENT / 100
}

/// Adjusts the base price of each iteration from observed throughput
///
/// Comparing only the last iteration against the plan overshoots under
/// per-transaction variance, so the cumulative pace decides when to get
/// cheaper and the last iteration decides when to get more expensive.
#[derive(Debug, Clone)]
pub struct PacingController {
    /// Planned time per transaction
    target_ratio: Duration,
    max_gas_price: Option<U256>,
}

impl PacingController {
    pub fn new(target: u64, target_time: Duration, max_gas_price: Option<U256>) -> Self {
        let target_ratio = target_time.div_f64(target.max(1) as f64);
        Self {
            target_ratio,
            max_gas_price,
        }
    }

    pub fn target_ratio(&self) -> Duration {
        self.target_ratio
    }

    /// Base price for iteration `iteration` given the batch start
    pub fn adjust(
        &self,
        iteration: u64,
        current_price: U256,
        global_start: Instant,
        last_duration: Duration,
    ) -> U256 {
        self.adjust_with_elapsed(iteration, current_price, global_start.elapsed(), last_duration)
    }

    /// Same as `adjust` with the batch elapsed time supplied by the caller
    pub fn adjust_with_elapsed(
        &self,
        iteration: u64,
        current_price: U256,
        elapsed: Duration,
        last_duration: Duration,
    ) -> U256 {
        if iteration == 0 {
            return current_price;
        }

        let actual_ratio = elapsed.div_f64(iteration as f64);
        let adjusted = if actual_ratio < self.target_ratio {
            discount(current_price)
        } else if last_duration >= self.target_ratio {
            self.capped(bump(current_price))
        } else {
            current_price
        };

        debug!(
            iteration,
            actual_secs = actual_ratio.as_secs_f64(),
            target_secs = self.target_ratio.as_secs_f64(),
            last_secs = last_duration.as_secs_f64(),
            "Pacing adjusted gas price {} -> {}",
            current_price,
            adjusted
        );
        adjusted
    }

    fn capped(&self, price: U256) -> U256 {
        match self.max_gas_price {
            Some(max) => price.min(max),
            None => price,
        }
    }
}

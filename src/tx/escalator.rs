//! Fee escalation for a stalled nonce

use super::gas::bump;
use super::pending::PendingSet;
use super::sender::{Rejection, Submission, TransactionSender};
use crate::chain::ChainClient;
use crate::error::PacerResult;

use ethers::types::U256;
use tracing::{info, warn};

/// What a single escalation step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// A higher-priced attempt joined the pending set
    Submitted,
    /// A pending attempt was mined meanwhile; nothing changed
    NonceAdvanced,
    /// The node already had this attempt; price stepped again
    Known,
    /// The node refused the replacement; price kept
    Underpriced,
    /// Already at the price cap; nothing sent
    Capped,
}

/// Re-prices the live nonce one step at a time
#[derive(Debug, Clone, Default)]
pub struct FeeEscalator {
    max_gas_price: Option<U256>,
}

impl FeeEscalator {
    pub fn new(max_gas_price: Option<U256>) -> Self {
        Self { max_gas_price }
    }

    /// Resubmit `nonce` one step above `current_price`
    ///
    /// Returns the price to escalate from next time and what happened.
    pub async fn escalate<C: ChainClient>(
        &self,
        sender: &TransactionSender<C>,
        current_price: U256,
        nonce: u64,
        pending: &mut PendingSet,
    ) -> PacerResult<(U256, Escalation)> {
        if self.max_gas_price.map_or(false, |max| current_price >= max) {
            warn!(
                "Nonce {} already at price cap {}, not escalating",
                nonce, current_price
            );
            return Ok((current_price, Escalation::Capped));
        }

        let new_price = self.capped(bump(current_price));

        match sender.submit(new_price, nonce).await? {
            Submission::Sent(attempt) => {
                info!(
                    "Escalated nonce {} from {} to {}: {:?}",
                    nonce, current_price, new_price, attempt.hash
                );
                pending.push(attempt)?;
                crate::metrics::record_escalation();
                Ok((new_price, Escalation::Submitted))
            }
            Submission::Rejected(Rejection::NonceTooLow) => {
                info!("Nonce {} advanced during escalation", nonce);
                Ok((current_price, Escalation::NonceAdvanced))
            }
            Submission::Rejected(Rejection::KnownTransaction) => {
                // Step again so the next call is not an identical no-op
                Ok((self.capped(bump(new_price)), Escalation::Known))
            }
            Submission::Rejected(Rejection::ReplacementUnderpriced) => {
                Ok((new_price, Escalation::Underpriced))
            }
        }
    }

    fn capped(&self, price: U256) -> U256 {
        match self.max_gas_price {
            Some(max) => price.min(max),
            None => price,
        }
    }
}

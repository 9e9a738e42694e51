//! Transaction sender: builds, broadcasts and classifies one attempt

use super::pending::Attempt;
use crate::chain::{ChainClient, SendError};
use crate::error::{PacerError, PacerResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Broadcast refusals that are part of normal operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The nonce was already consumed by a mined transaction
    NonceTooLow,
    /// This exact transaction is already known to the node
    KnownTransaction,
    /// A pooled transaction with this nonce pays at least as much
    ReplacementUnderpriced,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Rejection::NonceTooLow => "nonce_too_low",
            Rejection::KnownTransaction => "known_transaction",
            Rejection::ReplacementUnderpriced => "replacement_underpriced",
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Sent(Attempt),
    Rejected(Rejection),
}

/// Builds and broadcasts calls to the target contract method
pub struct TransactionSender<C: ChainClient> {
    client: Arc<C>,
    contract: Address,
    calldata: Bytes,
    /// Delay between nonce refreshes while the node lags
    retry_delay: Duration,
    max_attempts: u32,
}

impl<C: ChainClient> TransactionSender<C> {
    pub fn new(
        client: Arc<C>,
        contract: Address,
        method: &str,
        retry_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            contract,
            calldata: encode_call(method),
            retry_delay,
            max_attempts,
        }
    }

    /// Build a legacy call with the given nonce and price; signing happens at send time
    fn build_call_tx(&self, gas_price: U256, nonce: u64) -> TypedTransaction {
        TransactionRequest::new()
            .from(self.client.address())
            .to(self.contract)
            .data(self.calldata.clone())
            .nonce(nonce)
            .gas_price(gas_price)
            .into()
    }

    /// Broadcast one attempt
    pub async fn submit(&self, gas_price: U256, nonce: u64) -> PacerResult<Submission> {
        let tx = self.build_call_tx(gas_price, nonce);

        let rejection = match self.client.send_transaction(tx).await {
            Ok(hash) => {
                debug!("Broadcast {:?} (nonce {}, price {})", hash, nonce, gas_price);
                crate::metrics::record_attempt_sent();
                return Ok(Submission::Sent(Attempt {
                    hash,
                    nonce,
                    gas_price,
                    submitted_at: Instant::now(),
                }));
            }
            Err(SendError::NonceTooLow) => Rejection::NonceTooLow,
            Err(SendError::KnownTransaction) => Rejection::KnownTransaction,
            Err(SendError::ReplacementUnderpriced) => Rejection::ReplacementUnderpriced,
            Err(SendError::Rejected(message)) => {
                crate::metrics::record_rejection("fatal");
                return Err(PacerError::Broadcast { nonce, message });
            }
        };

        debug!(
            "Broadcast for nonce {} at price {} rejected: {:?}",
            nonce, gas_price, rejection
        );
        crate::metrics::record_rejection(rejection.as_str());
        Ok(Submission::Rejected(rejection))
    }

    /// Read the account nonce and broadcast until the node accepts a transaction
    ///
    /// The node may keep reporting a nonce that was just mined; each refusal
    /// re-reads the nonce after a fixed delay.
    pub async fn submit_with_fresh_nonce(&self, gas_price: U256) -> PacerResult<Attempt> {
        let address = self.client.address();
        let mut nonce = 0;

        for attempt in 1..=self.max_attempts {
            nonce = self.client.transaction_count(address).await?;

            match self.submit(gas_price, nonce).await? {
                Submission::Sent(sent) => {
                    if attempt > 1 {
                        info!("Nonce {} accepted after {} attempts", nonce, attempt);
                    }
                    return Ok(sent);
                }
                Submission::Rejected(rejection) => {
                    warn!(
                        "Nonce {} not accepted yet ({:?}), retry {}/{}",
                        nonce, rejection, attempt, self.max_attempts
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(PacerError::BroadcastExhausted {
            nonce,
            attempts: self.max_attempts,
        })
    }
}

/// Calldata for a zero-argument method: the 4-byte keccak selector
fn encode_call(signature: &str) -> Bytes {
    let digest = Keccak256::digest(signature.as_bytes());
    Bytes::from(digest[..4].to_vec())
}

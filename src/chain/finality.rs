//! Receipt tracking and confirmation depth
//!
//! A nonce can have several attempts in flight; whichever one the network
//! mined decides the final price. Once mined, the including block is watched
//! until enough blocks sit on top of it. If the block hash stops resolving
//! the block was reorganized away and the caller goes back to watching the
//! pending set.

use crate::chain::ChainClient;
use crate::error::PacerResult;
use crate::tx::{Attempt, PendingSet};

use ethers::types::{H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An attempt the network has included in a block
#[derive(Debug, Clone, PartialEq)]
pub struct MinedAttempt {
    pub attempt: Attempt,
    pub block_hash: H256,
    pub block_number: u64,
    /// Price reported by the chain for the included transaction
    pub gas_price: U256,
}

/// Outcome of waiting on a mined block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Reached,
    /// The block no longer resolves
    Forked,
}

/// Finds the mined attempt among those sharing a nonce
pub struct ConfirmationTracker<C: ChainClient> {
    client: Arc<C>,
}

impl<C: ChainClient> ConfirmationTracker<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// First attempt, in escalation order, with both a transaction and a receipt
    pub async fn find_mined(&self, pending: &PendingSet) -> PacerResult<Option<MinedAttempt>> {
        for attempt in pending.iter() {
            let receipt = match self.client.transaction_receipt(attempt.hash).await? {
                Some(receipt) => receipt,
                None => continue,
            };
            let tx = match self.client.transaction(attempt.hash).await? {
                Some(tx) if tx.nonce == attempt.nonce => tx,
                Some(tx) => {
                    warn!(
                        "Attempt {:?} reported with nonce {}, expected {}",
                        tx.hash, tx.nonce, attempt.nonce
                    );
                    continue;
                }
                None => continue,
            };

            debug!(
                "Attempt {:?} for nonce {} included in block {}",
                receipt.hash, attempt.nonce, receipt.block_number
            );
            return Ok(Some(MinedAttempt {
                attempt: attempt.clone(),
                block_hash: receipt.block_hash,
                block_number: receipt.block_number,
                gas_price: tx.gas_price,
            }));
        }

        Ok(None)
    }
}

/// Waits for confirmation depth while checking the block stays canonical
pub struct ForkGuard<C: ChainClient> {
    client: Arc<C>,
    /// Required blocks on top of the including block
    confirmation_blocks: u64,
    poll_interval: Duration,
}

impl<C: ChainClient> ForkGuard<C> {
    pub fn new(client: Arc<C>, confirmation_blocks: u64, poll_interval: Duration) -> Self {
        Self {
            client,
            confirmation_blocks,
            poll_interval,
        }
    }

    /// Poll until `head - block >= confirmations`, or until the block disappears
    pub async fn await_confirmations(&self, block_hash: H256) -> PacerResult<Depth> {
        loop {
            let block_number = match self.client.block_number_by_hash(block_hash).await? {
                Some(number) => number,
                None => {
                    warn!("Block {:?} no longer canonical, fork detected", block_hash);
                    crate::metrics::record_reorg();
                    return Ok(Depth::Forked);
                }
            };

            let head = self.client.block_number().await?;
            let confirmations = head.saturating_sub(block_number);
            if confirmations >= self.confirmation_blocks {
                info!(
                    "Block {} reached {} confirmations",
                    block_number, confirmations
                );
                return Ok(Depth::Reached);
            }

            debug!(
                "Block {} has {} / {} confirmations",
                block_number, confirmations, self.confirmation_blocks
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

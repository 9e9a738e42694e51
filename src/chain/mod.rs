//! Chain module - the facade the pacer talks to
//!
//! This module provides:
//! - The `ChainClient` trait consumed by the submission loop
//! - An ethers-backed implementation with multi-RPC failover
//! - Receipt tracking and fork-aware confirmation depth checks

pub mod finality;
pub mod provider;

#[cfg(test)]
pub mod fake;

pub use finality::{ConfirmationTracker, Depth, ForkGuard};
pub use provider::EthersClient;

use crate::error::PacerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Transaction fields the pacer cares about
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionInfo {
    pub hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
}

/// Receipt fields the pacer cares about
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptInfo {
    pub hash: H256,
    pub block_hash: H256,
    pub block_number: u64,
}

/// Classified broadcast failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    /// The nonce slot is already used by a mined transaction
    #[error("nonce too low")]
    NonceTooLow,

    /// The node already holds this exact transaction
    #[error("known transaction")]
    KnownTransaction,

    /// A same-nonce transaction with an equal or higher price is pooled
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,

    #[error("{0}")]
    Rejected(String),
}

impl SendError {
    /// Map a node error message onto the closed set of variants
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("nonce too low") {
            SendError::NonceTooLow
        } else if lower.contains("known transaction") || lower.contains("already known") {
            SendError::KnownTransaction
        } else if lower.contains("replacement transaction underpriced") {
            SendError::ReplacementUnderpriced
        } else {
            SendError::Rejected(message.to_string())
        }
    }
}

/// Blockchain access used by the submission loop
///
/// Lookups return `Ok(None)` for not-found; `Err` means the node could not be
/// reached and is fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the signing account
    fn address(&self) -> Address;

    async fn transaction(&self, hash: H256) -> PacerResult<Option<TransactionInfo>>;

    async fn transaction_receipt(&self, hash: H256) -> PacerResult<Option<ReceiptInfo>>;

    /// Number of the block with this hash, `None` once it left the canonical chain
    async fn block_number_by_hash(&self, block_hash: H256) -> PacerResult<Option<u64>>;

    /// Chain head
    async fn block_number(&self) -> PacerResult<u64>;

    /// Next nonce of `address` as reported by the node
    async fn transaction_count(&self, address: Address) -> PacerResult<u64>;

    async fn balance(&self, address: Address) -> PacerResult<U256>;

    /// Node's suggested gas price
    async fn gas_price(&self) -> PacerResult<U256>;

    /// Sign and broadcast
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_node_messages() {
        assert_eq!(
            SendError::classify("(code: -32000, message: nonce too low, data: None)"),
            SendError::NonceTooLow
        );
        assert_eq!(
            SendError::classify("known transaction: 0xabc"),
            SendError::KnownTransaction
        );
        assert_eq!(SendError::classify("already known"), SendError::KnownTransaction);
        assert_eq!(
            SendError::classify("Replacement transaction underpriced"),
            SendError::ReplacementUnderpriced
        );
        assert_eq!(
            SendError::classify("insufficient funds for gas * price + value"),
            SendError::Rejected("insufficient funds for gas * price + value".to_string())
        );
    }
}

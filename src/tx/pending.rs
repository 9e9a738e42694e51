//! Attempts sharing one nonce

use crate::error::{PacerError, PacerResult};

use ethers::types::{H256, U256};
use tokio::time::Instant;

/// One broadcast of the logical transaction for a nonce
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
    pub submitted_at: Instant,
}

/// Attempts for the live nonce, in escalation order
///
/// Prices are strictly increasing. Superseded attempts stay in the set: the
/// network may still mine any of them.
#[derive(Debug, Clone)]
pub struct PendingSet {
    nonce: u64,
    attempts: Vec<Attempt>,
}

impl PendingSet {
    pub fn new(nonce: u64) -> Self {
        Self {
            nonce,
            attempts: Vec::new(),
        }
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Append an attempt priced above every attempt already in the set
    pub fn push(&mut self, attempt: Attempt) -> PacerResult<()> {
        if attempt.nonce != self.nonce {
            return Err(PacerError::Internal(format!(
                "attempt for nonce {} added to pending set of nonce {}",
                attempt.nonce, self.nonce
            )));
        }
        if let Some(last) = self.attempts.last() {
            if attempt.gas_price <= last.gas_price {
                return Err(PacerError::Internal(format!(
                    "attempt price {} does not exceed previous price {}",
                    attempt.gas_price, last.gas_price
                )));
            }
        }

        self.attempts.push(attempt);
        Ok(())
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Highest price offered so far for this nonce
    pub fn highest_price(&self) -> Option<U256> {
        self.attempts.last().map(|a| a.gas_price)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attempt> {
        self.attempts.iter()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

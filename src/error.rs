//! Error types for the pacer

use thiserror::Error;

/// Main error type for the pacer
///
/// Everything that reaches this type is fatal for the batch. Classified
/// broadcast rejections and not-found lookups are handled inside the
/// submission loop and never show up here.
#[derive(Error, Debug)]
pub enum PacerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error: {message}")]
    ChainConnection { message: String },

    #[error("Broadcast rejected for nonce {nonce}: {message}")]
    Broadcast { nonce: u64, message: String },

    #[error("No transaction accepted for nonce {nonce} after {attempts} attempts")]
    BroadcastExhausted { nonce: u64, attempts: u32 },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PacerError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        PacerError::ChainConnection {
            message: err.to_string(),
        }
    }

    /// Errors raised by the node rather than by our own bookkeeping
    pub fn is_chain_side(&self) -> bool {
        matches!(
            self,
            PacerError::ChainConnection { .. }
                | PacerError::Broadcast { .. }
                | PacerError::BroadcastExhausted { .. }
        )
    }
}

/// Result type for pacer operations
pub type PacerResult<T> = Result<T, PacerError>;

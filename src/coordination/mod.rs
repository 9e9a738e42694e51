//! Batch coordination
//!
//! The coordination layer:
//! 1. Adjusts the base price from throughput before each nonce
//! 2. Broadcasts, escalates and confirms one nonce at a time
//! 3. Repeats until the batch target is confirmed

pub mod batch;
pub mod engine;

pub use batch::{resolve_base_price, BatchDriver};
pub use engine::IterationOrchestrator;

#[cfg(test)]
pub(crate) fn test_settings(
    target: u64,
    target_time_secs: u64,
    confirmations: u64,
) -> crate::config::Settings {
    use crate::config::*;

    Settings {
        network: NetworkConfig {
            rpc_urls: vec!["http://localhost:8545".to_string()],
            confirmations,
        },
        contract: ContractConfig {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            method: "increment()".to_string(),
        },
        wallet: WalletConfig {
            private_key_env: "TX_PACER_PRIVATE_KEY".to_string(),
        },
        batch: BatchConfig {
            target,
            target_time_secs,
            base_gas_price: Some(100),
            max_gas_price: None,
            max_iteration_secs: None,
        },
        timing: TimingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

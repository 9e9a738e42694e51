//! Configuration management for the pacer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Average block time assumed by the feasibility check, in seconds
const AVG_BLOCK_SECS: f64 = 16.5;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    pub contract: ContractConfig,
    pub wallet: WalletConfig,
    pub batch: BatchConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub rpc_urls: Vec<String>,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    #[serde(default = "default_method")]
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Number of transactions to confirm
    pub target: u64,
    /// Wall-clock budget for the whole batch
    pub target_time_secs: u64,
    /// Starting gas price in wei; node price / 10 when absent
    pub base_gas_price: Option<u64>,
    pub max_gas_price: Option<u64>,
    pub max_iteration_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_pending_poll_ms")]
    pub pending_poll_ms: u64,
    #[serde(default = "default_escalation_interval_secs")]
    pub escalation_interval_secs: u64,
    #[serde(default = "default_broadcast_retry_ms")]
    pub broadcast_retry_ms: u64,
    #[serde(default = "default_broadcast_max_attempts")]
    pub broadcast_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_method() -> String {
    "increment()".to_string()
}

fn default_confirmation_poll_ms() -> u64 {
    3_000
}

fn default_pending_poll_ms() -> u64 {
    1_000
}

fn default_escalation_interval_secs() -> u64 {
    25
}

fn default_broadcast_retry_ms() -> u64 {
    1_000
}

fn default_broadcast_max_attempts() -> u32 {
    60
}

fn default_metrics_port() -> u16 {
    9100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirmation_poll_ms: default_confirmation_poll_ms(),
            pending_poll_ms: default_pending_poll_ms(),
            escalation_interval_secs: default_escalation_interval_secs(),
            broadcast_retry_ms: default_broadcast_retry_ms(),
            broadcast_max_attempts: default_broadcast_max_attempts(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl TimingConfig {
    pub fn confirmation_poll(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn pending_poll(&self) -> Duration {
        Duration::from_millis(self.pending_poll_ms)
    }

    pub fn escalation_interval(&self) -> Duration {
        Duration::from_secs(self.escalation_interval_secs)
    }

    pub fn broadcast_retry(&self) -> Duration {
        Duration::from_millis(self.broadcast_retry_ms)
    }
}

impl BatchConfig {
    pub fn target_time(&self) -> Duration {
        Duration::from_secs(self.target_time_secs)
    }

    pub fn max_gas_price(&self) -> Option<U256> {
        self.max_gas_price.map(U256::from)
    }

    pub fn max_iteration(&self) -> Option<Duration> {
        self.max_iteration_secs.map(Duration::from_secs)
    }
}

impl Settings {
    /// Load settings from the file named by `TX_PACER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TX_PACER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;
        settings.warn_if_infeasible();

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.batch.target == 0 {
            anyhow::bail!("batch.target must be greater than zero");
        }
        if self.batch.target_time_secs == 0 {
            anyhow::bail!("batch.target_time_secs must be greater than zero");
        }
        if self.network.rpc_urls.iter().all(|url| url.trim().is_empty()) {
            anyhow::bail!("No RPC URLs configured");
        }

        self.contract_address()?;
        if !self.contract.method.ends_with("()") || self.contract.method.len() < 3 {
            anyhow::bail!(
                "Contract method {} must be a zero-argument signature like increment()",
                self.contract.method
            );
        }

        let timing = &self.timing;
        if timing.confirmation_poll_ms == 0
            || timing.pending_poll_ms == 0
            || timing.escalation_interval_secs == 0
            || timing.broadcast_max_attempts == 0
        {
            anyhow::bail!("Timing intervals and broadcast_max_attempts must be non-zero");
        }

        if let (Some(base), Some(max)) = (self.batch.base_gas_price, self.batch.max_gas_price) {
            if base > max {
                anyhow::bail!("base_gas_price {} exceeds max_gas_price {}", base, max);
            }
        }

        Ok(())
    }

    /// Log a warning when the targets cannot realistically be met
    fn warn_if_infeasible(&self) {
        let target = self.batch.target as f64;
        let target_time = self.batch.target_time_secs as f64;
        let per_tx = (self.network.confirmations as f64 + 1.0) * AVG_BLOCK_SECS;

        if target * per_tx > target_time {
            tracing::warn!(
                target_tx = self.batch.target,
                target_time_secs = self.batch.target_time_secs,
                "According to average mining and confirmation speed this target is nearly \
                 impossible; performance is not guaranteed and spending may be excessive"
            );
        } else if target_time / (target * 60.0) <= 1.0 {
            tracing::warn!(
                target_tx = self.batch.target,
                target_time_secs = self.batch.target_time_secs,
                "Current targets are hard to reach due to possible network fluctuations"
            );
        }
    }

    /// Parsed contract address
    pub fn contract_address(&self) -> Result<Address> {
        self.contract
            .address
            .trim()
            .parse::<Address>()
            .with_context(|| format!("Invalid contract address: {}", self.contract.address))
    }

    /// Read the signing key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.wallet.private_key_env).with_context(|| {
            format!(
                "Please set the environment variable {}",
                self.wallet.private_key_env
            )
        })
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

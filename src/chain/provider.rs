//! Chain client with multi-RPC support and automatic failover

use super::{ChainClient, ReceiptInfo, SendError, TransactionInfo};
use crate::config::NetworkConfig;
use crate::error::{PacerError, PacerResult};

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

type SignedProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Multi-provider client; every provider signs with the same wallet
pub struct EthersClient {
    /// Signing middleware stacks, one per RPC URL
    providers: Vec<SignedProvider>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Address of the signing wallet
    address: Address,
    chain_id: u64,
}

impl EthersClient {
    /// Connect to every configured RPC URL and bind the wallet to the chain id
    pub async fn connect(config: &NetworkConfig, private_key: &str) -> PacerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(PacerError::ChainConnection {
                message: "No valid RPC providers".to_string(),
            });
        }

        let mut chain_id = None;
        for provider in &http_providers {
            match provider.get_chainid().await {
                Ok(id) => {
                    chain_id = Some(id.low_u64());
                    break;
                }
                Err(e) => warn!("Failed to get chain id: {}", e),
            }
        }
        let chain_id = chain_id.ok_or_else(|| PacerError::ChainConnection {
            message: "All providers failed to report the chain id".to_string(),
        })?;

        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| PacerError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);
        let address = wallet.address();

        let providers = http_providers
            .into_iter()
            .map(|provider| SignerMiddleware::new(provider, wallet.clone()))
            .collect();

        info!("Connected to chain {} as {:?}", chain_id, address);

        Ok(Self {
            providers,
            current_provider: AtomicUsize::new(0),
            address,
            chain_id,
        })
    }

    /// Get the active provider
    fn active(&self) -> &SignedProvider {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Run a read against the active provider, moving to the next one on error
    async fn read<T, E, F, Fut>(&self, what: &str, call: F) -> PacerResult<T>
    where
        F: Fn(SignedProvider) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = String::new();

        for _ in 0..self.providers.len() {
            match call(self.active().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to get {}: {}", what, e);
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(PacerError::ChainConnection {
            message: format!("All providers failed to report {}: {}", what, last_error),
        })
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    fn address(&self) -> Address {
        self.address
    }

    async fn transaction(&self, hash: H256) -> PacerResult<Option<TransactionInfo>> {
        let tx = self
            .read("transaction", move |p| async move { p.get_transaction(hash).await })
            .await?;

        Ok(tx.map(|tx| TransactionInfo {
            hash: tx.hash,
            nonce: tx.nonce.low_u64(),
            gas_price: tx.gas_price.unwrap_or_default(),
        }))
    }

    async fn transaction_receipt(&self, hash: H256) -> PacerResult<Option<ReceiptInfo>> {
        let receipt = self
            .read("receipt", move |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        // A receipt without block coordinates is not mined yet
        Ok(receipt.and_then(|r| {
            Some(ReceiptInfo {
                hash: r.transaction_hash,
                block_hash: r.block_hash?,
                block_number: r.block_number?.as_u64(),
            })
        }))
    }

    async fn block_number_by_hash(&self, block_hash: H256) -> PacerResult<Option<u64>> {
        let block = self
            .read("block", move |p| async move {
                p.get_block(BlockId::Hash(block_hash)).await
            })
            .await?;

        Ok(block.and_then(|b| b.number).map(|n| n.as_u64()))
    }

    async fn block_number(&self) -> PacerResult<u64> {
        let head = self
            .read("block number", move |p| async move { p.get_block_number().await })
            .await?;
        Ok(head.as_u64())
    }

    async fn transaction_count(&self, address: Address) -> PacerResult<u64> {
        let nonce = self
            .read("nonce", move |p| async move {
                p.get_transaction_count(address, None).await
            })
            .await?;
        Ok(nonce.low_u64())
    }

    async fn balance(&self, address: Address) -> PacerResult<U256> {
        self.read("balance", move |p| async move { p.get_balance(address, None).await })
            .await
    }

    async fn gas_price(&self) -> PacerResult<U256> {
        self.read("gas price", move |p| async move { p.get_gas_price().await })
            .await
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, SendError> {
        match self.active().send_transaction(tx, None).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => Err(SendError::classify(&e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    type Reply = fn(&str) -> Result<Value, &'static str>;

    fn healthy(method: &str) -> Result<Value, &'static str> {
        match method {
            "eth_chainId" => Ok(json!("0x7a69")),
            "eth_gasPrice" => Ok(json!("0x64")),
            "eth_blockNumber" => Ok(json!("0x10")),
            _ => Ok(Value::Null),
        }
    }

    /// Knows its chain id, fails every other call
    fn degraded(method: &str) -> Result<Value, &'static str> {
        match method {
            "eth_chainId" => Ok(json!("0x7a69")),
            _ => Err("upstream down"),
        }
    }

    fn down(_method: &str) -> Result<Value, &'static str> {
        Err("upstream down")
    }

    /// Local JSON-RPC node answering every call through `reply`
    async fn spawn_node(reply: Reply) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(request): Json<Value>| async move {
                let method = request["method"].as_str().unwrap_or_default().to_string();
                Json(match reply(&method) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": request["id"], "result": result}),
                    Err(message) => json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": {"code": -32603, "message": message}
                    }),
                })
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    async fn connect_to(nodes: &[Reply]) -> PacerResult<EthersClient> {
        let mut rpc_urls = Vec::new();
        for reply in nodes {
            rpc_urls.push(spawn_node(*reply).await);
        }
        let config = NetworkConfig {
            rpc_urls,
            confirmations: 1,
        };
        EthersClient::connect(&config, TEST_KEY).await
    }

    #[tokio::test]
    async fn test_reads_fail_over_to_healthy_node() {
        let client = connect_to(&[degraded, healthy]).await.unwrap();
        assert_eq!(client.chain_id(), 31337);

        assert_eq!(client.transaction_receipt(H256::zero()).await.unwrap(), None);
        assert_eq!(client.current_provider.load(Ordering::Relaxed), 1);

        assert_eq!(client.block_number_by_hash(H256::zero()).await.unwrap(), None);
        assert_eq!(client.transaction(H256::zero()).await.unwrap(), None);
        assert_eq!(client.gas_price().await.unwrap(), U256::from(100));
        assert_eq!(client.block_number().await.unwrap(), 16);
        assert_eq!(client.current_provider.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_lookup_fails_over_after_active_node_breaks() {
        let client = connect_to(&[healthy, degraded]).await.unwrap();
        client.failover();

        assert_eq!(client.block_number_by_hash(H256::zero()).await.unwrap(), None);
        assert_eq!(client.current_provider.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connect_skips_dead_node() {
        let client = connect_to(&[down, healthy]).await.unwrap();
        assert_eq!(client.chain_id(), 31337);
        assert_eq!(client.address(), TEST_KEY.parse::<LocalWallet>().unwrap().address());
    }

    #[tokio::test]
    async fn test_every_node_failing_is_fatal() {
        let client = connect_to(&[degraded, degraded]).await.unwrap();
        let err = client.transaction_receipt(H256::zero()).await.unwrap_err();
        assert!(matches!(err, PacerError::ChainConnection { .. }));
        assert!(err.to_string().contains("upstream down"));

        let err = connect_to(&[down, down]).await.err();
        assert!(matches!(err, Some(PacerError::ChainConnection { .. })));
    }
}

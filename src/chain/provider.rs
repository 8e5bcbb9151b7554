//! Node client with multi-RPC support and automatic failover

use super::NodeClient;
use crate::config::NodeConfig;
use crate::error::{TxError, TxResult};
use crate::types::{CallRequest, Receipt, ReceiptStatus};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct EthersNodeClient {
    /// Node configuration
    config: NodeConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl EthersNodeClient {
    /// Create a new node client
    pub fn new(config: NodeConfig) -> TxResult<Self> {
        let mut http_providers = Vec::new();

        // Initialize HTTP providers
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(config.poll_interval_ms));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TxError::Network("No valid RPC providers".to_string()));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Failover to RPC provider {} of {}", next, self.http_providers.len());
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed: {}", e);
                false
            }
        }
    }

    pub fn rpc_urls(&self) -> &[String] {
        &self.config.rpc_urls
    }

    /// Run `f` against each provider in turn until one answers.
    ///
    /// A JSON-RPC error response is the node's answer and is returned through
    /// `rejected` without trying the next provider.
    async fn with_failover<T, F, Fut>(
        &self,
        operation: &str,
        rejected: fn(String) -> TxError,
        f: F,
    ) -> TxResult<T>
    where
        T: Send,
        F: Fn(Provider<Http>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut last_error = String::from("no provider attempted");

        for _ in 0..self.http_providers.len() {
            match f(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if let Some(resp) = e.as_error_response() {
                        let message = match resp.data {
                            Some(ref data) => format!("{} (data: {})", resp.message, data),
                            None => resp.message.clone(),
                        };
                        debug!("{} rejected by node: {}", operation, message);
                        return Err(rejected(message));
                    }
                    warn!("{} failed: {}", operation, e);
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(TxError::Network(format!(
            "All providers failed to {}: {}",
            operation, last_error
        )))
    }
}

fn to_u64(value: U256, what: &str) -> TxResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(TxError::Network(format!("{} {} does not fit in u64", what, value)));
    }
    Ok(value.as_u64())
}

/// Receipts without a block number are still pending on some nodes
fn to_receipt(receipt: TransactionReceipt) -> Option<Receipt> {
    let block_number = receipt.block_number?.as_u64();
    // pre-Byzantium receipts carry no status field
    let status = match receipt.status {
        Some(s) if s.as_u64() == 1 => ReceiptStatus::Success,
        Some(_) => ReceiptStatus::Failed,
        None => ReceiptStatus::Success,
    };
    Some(Receipt {
        hash: receipt.transaction_hash,
        status,
        block_number,
        gas_used: receipt.gas_used.unwrap_or_default(),
        effective_gas_price: receipt.effective_gas_price,
    })
}

#[async_trait]
impl NodeClient for EthersNodeClient {
    async fn chain_id(&self) -> TxResult<U256> {
        self.with_failover("get chain id", TxError::UnknownChain, |p| async move {
            p.get_chainid().await
        })
        .await
    }

    async fn pending_nonce(&self, address: Address) -> TxResult<u64> {
        let nonce = self
            .with_failover("get nonce", TxError::Network, move |p| async move {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;
        to_u64(nonce, "nonce")
    }

    async fn balance(&self, address: Address) -> TxResult<U256> {
        self.with_failover("get balance", TxError::Network, move |p| async move {
            p.get_balance(address, None).await
        })
        .await
    }

    async fn suggested_gas_price(&self) -> TxResult<U256> {
        self.with_failover("get gas price", TxError::Quote, |p| async move {
            p.get_gas_price().await
        })
        .await
    }

    async fn suggested_priority_fee(&self) -> TxResult<U256> {
        self.with_failover("get priority fee", TxError::Quote, |p| async move {
            p.request::<_, U256>("eth_maxPriorityFeePerGas", ()).await
        })
        .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> TxResult<u64> {
        let tx = call.to_typed();
        let gas = self
            .with_failover("estimate gas", TxError::Estimation, move |p| {
                let tx = tx.clone();
                async move { p.estimate_gas(&tx, None).await }
            })
            .await?;
        to_u64(gas, "gas estimate").map_err(|e| TxError::Estimation(e.to_string()))
    }

    async fn call(&self, call: &CallRequest) -> TxResult<Bytes> {
        let tx = call.to_typed();
        self.with_failover("call", TxError::Estimation, move |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    async fn broadcast(&self, raw: Bytes) -> TxResult<H256> {
        self.with_failover("send raw transaction", TxError::Submission, move |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(raw)
                    .await
                    .map(|pending| pending.tx_hash())
            }
        })
        .await
    }

    async fn receipt(&self, hash: H256) -> TxResult<Option<Receipt>> {
        let receipt = self
            .with_failover("get receipt", TxError::Network, move |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;
        Ok(receipt.and_then(to_receipt))
    }

    async fn block_number(&self) -> TxResult<u64> {
        let block = self
            .with_failover("get block number", TxError::Network, |p| async move {
                p.get_block_number().await
            })
            .await?;
        Ok(block.as_u64())
    }

    async fn code_at(&self, address: Address) -> TxResult<Bytes> {
        self.with_failover("get code", TxError::Network, move |p| async move {
            p.get_code(address, None).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    fn node_config(urls: &[&str]) -> NodeConfig {
        NodeConfig {
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            expected_chain_id: None,
            poll_interval_ms: 1_000,
        }
    }

    #[test]
    fn test_rejects_when_no_valid_url() {
        let result = EthersNodeClient::new(node_config(&["not a url"]));
        assert!(matches!(result, Err(TxError::Network(_))));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let client =
            EthersNodeClient::new(node_config(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"]))
                .unwrap();
        assert_eq!(client.http().url().port(), Some(8545));
        client.failover();
        assert_eq!(client.http().url().port(), Some(8546));
        client.failover();
        assert_eq!(client.http().url().port(), Some(8545));
    }

    #[test]
    fn test_receipt_mapping() {
        let mut raw = TransactionReceipt {
            transaction_hash: H256::repeat_byte(1),
            block_number: Some(U64::from(123u64)),
            gas_used: Some(U256::from(21_000u64)),
            status: Some(U64::from(0u64)),
            effective_gas_price: Some(U256::from(7u64)),
            ..Default::default()
        };
        let receipt = to_receipt(raw.clone()).unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.block_number, 123);
        assert_eq!(receipt.gas_used, U256::from(21_000u64));
        assert_eq!(receipt.fee_paid(), Some(U256::from(147_000u64)));

        raw.status = Some(U64::from(1u64));
        assert!(to_receipt(raw.clone()).unwrap().succeeded());

        raw.block_number = None;
        assert!(to_receipt(raw).is_none());
    }
}

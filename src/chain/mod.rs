//! Chain module - node access for the transaction lifecycle
//!
//! This module provides:
//! - The `NodeClient` capability every component borrows
//! - An ethers-backed implementation with multi-RPC failover

pub mod provider;

pub use provider::EthersNodeClient;

use crate::error::TxResult;
use crate::types::{CallRequest, Receipt};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// JSON-RPC node capability.
///
/// Implementations own no per-transaction state and must tolerate concurrent
/// calls without external locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Chain identifier reported by the node
    async fn chain_id(&self) -> TxResult<U256>;

    /// Next nonce for `address`, counting pending transactions
    async fn pending_nonce(&self, address: Address) -> TxResult<u64>;

    async fn balance(&self, address: Address) -> TxResult<U256>;

    /// Suggested legacy gas price
    async fn suggested_gas_price(&self) -> TxResult<U256>;

    /// Suggested EIP-1559 priority fee
    async fn suggested_priority_fee(&self) -> TxResult<U256>;

    /// Simulate `call` and return the gas it would use
    async fn estimate_gas(&self, call: &CallRequest) -> TxResult<u64>;

    /// Read-only execution
    async fn call(&self, call: &CallRequest) -> TxResult<Bytes>;

    /// Submit raw signed bytes, returning the hash the node assigned
    async fn broadcast(&self, raw: Bytes) -> TxResult<H256>;

    /// `None` until the transaction is included in a block
    async fn receipt(&self, hash: H256) -> TxResult<Option<Receipt>>;

    async fn block_number(&self) -> TxResult<u64>;

    async fn code_at(&self, address: Address) -> TxResult<Bytes>;
}

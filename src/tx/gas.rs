//! Gas parameter resolution

use crate::chain::NodeClient;
use crate::error::TxResult;
use crate::types::{GasParams, TxIntent};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::debug;

/// Resolves gas limit and legacy gas price for an intended transaction.
///
/// A non-zero gas limit hint and a present price hint are used verbatim.
/// Zero always means "estimate".
#[derive(Clone)]
pub struct GasResolver {
    node: Arc<dyn NodeClient>,
    /// Sender used for simulations
    from: Address,
    /// Buffer percentage added to estimated gas limits (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
}

impl GasResolver {
    /// Create a new gas resolver
    pub fn new(node: Arc<dyn NodeClient>, from: Address) -> Self {
        Self {
            node,
            from,
            gas_limit_buffer_percent: 0,
        }
    }

    pub fn with_buffer_percent(mut self, percent: u64) -> Self {
        self.gas_limit_buffer_percent = percent;
        self
    }

    /// Resolve `{gas_limit, gas_price}` for `intent`
    pub async fn resolve(
        &self,
        gas_limit_hint: u64,
        price_hint: Option<U256>,
        intent: &TxIntent,
    ) -> TxResult<GasParams> {
        let gas_limit = self.resolve_gas_limit(gas_limit_hint, intent).await?;
        let gas_price = self.resolve_gas_price(price_hint).await?;

        let params = GasParams::legacy(gas_limit, gas_price);
        params.validate()?;
        Ok(params)
    }

    /// Hint if non-zero, otherwise a simulation of the call
    pub async fn resolve_gas_limit(&self, hint: u64, intent: &TxIntent) -> TxResult<u64> {
        if hint != 0 {
            return Ok(hint);
        }

        let estimated = self.node.estimate_gas(&intent.as_call(self.from)).await?;
        let buffer = estimated.saturating_mul(self.gas_limit_buffer_percent) / 100;
        let gas_limit = estimated.saturating_add(buffer);

        debug!("Estimated gas limit {} (buffered to {})", estimated, gas_limit);
        Ok(gas_limit)
    }

    /// Hint if present, otherwise the node's suggested legacy price
    pub async fn resolve_gas_price(&self, hint: Option<U256>) -> TxResult<U256> {
        match hint {
            Some(price) => Ok(price),
            None => {
                let price = self.node.suggested_gas_price().await?;
                debug!("Suggested gas price: {}", price);
                Ok(price)
            }
        }
    }

    /// Calculate total cost in wei
    pub fn total_cost(value: U256, params: &GasParams) -> U256 {
        params.total_cost(value)
    }
}

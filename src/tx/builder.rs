//! Transaction assembly and signing with EIP-1559 first, legacy on failure

use super::gas::GasResolver;
use crate::chain::NodeClient;
use crate::config::{GasPriceStrategy, TxPolicy};
use crate::error::{TxError, TxResult};
use crate::metrics;
use crate::types::{
    ChainId, FeeModel, GasHints, GasParams, PendingTransaction, SignedTransaction, TxIntent,
};
use crate::wallet::KeyProvider;

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds and signs transactions for one account on one chain
#[derive(Clone)]
pub struct TransactionBuilder {
    node: Arc<dyn NodeClient>,
    key: Arc<dyn KeyProvider>,
    chain_id: ChainId,
    gas: GasResolver,
    strategy: GasPriceStrategy,
    /// Derived max fee = multiplier x suggested legacy price
    max_fee_multiplier: u64,
}

impl TransactionBuilder {
    pub fn new(node: Arc<dyn NodeClient>, key: Arc<dyn KeyProvider>, chain_id: ChainId) -> Self {
        let gas = GasResolver::new(node.clone(), key.address());
        Self {
            node,
            key,
            chain_id,
            gas,
            strategy: GasPriceStrategy::Auto,
            max_fee_multiplier: 2,
        }
    }

    pub fn with_policy(mut self, policy: &TxPolicy) -> Self {
        self.strategy = policy.gas_price_strategy;
        self.max_fee_multiplier = policy.max_fee_multiplier;
        self.gas = self
            .gas
            .with_buffer_percent(policy.gas_limit_buffer_percent);
        self
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Address every transaction is signed from
    pub fn address(&self) -> Address {
        self.key.address()
    }

    pub fn gas_resolver(&self) -> &GasResolver {
        &self.gas
    }

    /// Resolve, assemble and sign `intent`.
    ///
    /// Nonce and gas limit are resolved once and shared by both fee models,
    /// so a legacy fallback carries exactly what the dynamic attempt used.
    pub async fn build(&self, intent: &TxIntent, hints: &GasHints) -> TxResult<SignedTransaction> {
        let nonce = match hints.nonce {
            Some(nonce) => nonce,
            None => self.node.pending_nonce(self.key.address()).await?,
        };
        let gas_limit = self.gas.resolve_gas_limit(hints.gas_limit, intent).await?;

        match self.strategy {
            GasPriceStrategy::Legacy => self.build_legacy(intent, hints, nonce, gas_limit).await,
            GasPriceStrategy::Eip1559 => self.build_dynamic(intent, hints, nonce, gas_limit).await,
            GasPriceStrategy::Auto => {
                match self.build_dynamic(intent, hints, nonce, gas_limit).await {
                    Ok(signed) => Ok(signed),
                    Err(e) => {
                        debug!("EIP-1559 build failed, falling back to legacy: {}", e);
                        metrics::record_fee_model_fallback(self.chain_id);
                        self.build_legacy(intent, hints, nonce, gas_limit).await
                    }
                }
            }
        }
    }

    async fn build_dynamic(
        &self,
        intent: &TxIntent,
        hints: &GasHints,
        nonce: u64,
        gas_limit: u64,
    ) -> TxResult<SignedTransaction> {
        let fee = self.dynamic_fee(hints).await?;
        self.assemble(intent, nonce, GasParams { gas_limit, fee })
    }

    async fn build_legacy(
        &self,
        intent: &TxIntent,
        hints: &GasHints,
        nonce: u64,
        gas_limit: u64,
    ) -> TxResult<SignedTransaction> {
        let gas_price = self.gas.resolve_gas_price(hints.gas_price).await?;
        self.assemble(intent, nonce, GasParams::legacy(gas_limit, gas_price))
    }

    async fn dynamic_fee(&self, hints: &GasHints) -> TxResult<FeeModel> {
        let tip = match hints.max_priority_fee_per_gas {
            Some(tip) => tip,
            None => self.node.suggested_priority_fee().await?,
        };

        let cap = match hints.max_fee_per_gas {
            Some(cap) => cap,
            None => {
                let price = self.node.suggested_gas_price().await?;
                // the cap must always cover the tip
                price
                    .saturating_mul(U256::from(self.max_fee_multiplier))
                    .max(tip)
            }
        };

        Ok(FeeModel::Dynamic {
            max_priority_fee_per_gas: tip,
            max_fee_per_gas: cap,
        })
    }

    fn assemble(
        &self,
        intent: &TxIntent,
        nonce: u64,
        gas: GasParams,
    ) -> TxResult<SignedTransaction> {
        let pending = PendingTransaction {
            to: intent.to,
            value: intent.value,
            data: intent.data.clone(),
            nonce,
            gas,
            chain_id: self.chain_id,
        };
        let signed = self.sign(pending)?;

        info!(
            "Built {} transaction {:?} (nonce {}, gas limit {})",
            if signed.fee().is_dynamic() { "EIP-1559" } else { "legacy" },
            signed.hash(),
            signed.nonce(),
            gas.gas_limit
        );
        Ok(signed)
    }

    /// Sign `tx` with the scheme matching its fee model.
    ///
    /// Legacy transactions carry an EIP-155 `v`; dynamic-fee transactions
    /// carry the bare recovery id.
    pub fn sign(&self, tx: PendingTransaction) -> TxResult<SignedTransaction> {
        if tx.chain_id == 0 {
            return Err(TxError::UnknownChain(
                "refusing to sign for chain id 0".to_string(),
            ));
        }
        tx.gas.validate()?;

        let from = self.key.address();
        let typed = tx.to_typed(from);
        let mut signature = self.key.sign_hash(typed.sighash())?;

        let recovery_id = signature
            .v
            .checked_sub(27)
            .filter(|id| *id <= 1)
            .ok_or_else(|| {
                TxError::Signing(format!("unexpected signature v {}", signature.v))
            })?;

        signature.v = match tx.gas.fee {
            FeeModel::Legacy { .. } => tx
                .chain_id
                .checked_mul(2)
                .and_then(|v| v.checked_add(35 + recovery_id))
                .ok_or_else(|| {
                    TxError::Signing(format!("chain id {} too large for EIP-155", tx.chain_id))
                })?,
            FeeModel::Dynamic { .. } => recovery_id,
        };

        let raw = typed.rlp_signed(&signature);
        let hash = H256(keccak256(&raw));

        if signature.recover(typed.sighash()).ok() != Some(from) {
            warn!("Signature for {:?} does not recover to {:?}", hash, from);
            return Err(TxError::Signing(format!(
                "signature does not recover to {:?}",
                from
            )));
        }

        Ok(SignedTransaction::new(tx, from, signature, raw, hash))
    }
}

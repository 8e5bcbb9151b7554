//! Transaction session for one account on one chain
//!
//! `TxClient` wires the gas resolver, builder, submitter and confirmation
//! tracker around a shared node handle and key. Everything a session needs is
//! held here; there is no process-wide state besides the metrics registry.

use crate::abi;
use crate::chain::{EthersNodeClient, NodeClient};
use crate::config::{Settings, TxPolicy};
use crate::error::{TxError, TxResult};
use crate::tx::{Broadcaster, ConfirmationTracker, RetrySubmitter, TransactionBuilder};
use crate::types::{
    parse_address, ChainId, GasHints, GasParams, Receipt, SignedTransaction, TxIntent,
};
use crate::wallet::{load_wallet, KeyProvider};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Client session: one signing key, one chain, one policy
pub struct TxClient {
    node: Arc<dyn NodeClient>,
    key: Arc<dyn KeyProvider>,
    chain_id: ChainId,
    policy: TxPolicy,
    builder: TransactionBuilder,
    tracker: Arc<ConfirmationTracker>,
    submitter: RetrySubmitter,
}

impl TxClient {
    /// Open a session. The chain id is fetched once here and never again.
    pub async fn connect(
        node: Arc<dyn NodeClient>,
        key: Arc<dyn KeyProvider>,
        policy: TxPolicy,
        expected_chain_id: Option<ChainId>,
    ) -> TxResult<Self> {
        let chain_id = Self::fetch_chain_id(node.as_ref(), expected_chain_id).await?;

        let builder =
            TransactionBuilder::new(node.clone(), key.clone(), chain_id).with_policy(&policy);
        let tracker =
            Arc::new(ConfirmationTracker::new(node.clone(), chain_id).with_policy(&policy));
        let submitter = RetrySubmitter::new(
            Broadcaster::new(node.clone(), chain_id),
            builder.clone(),
            tracker.clone(),
        )
        .with_policy(&policy);

        info!(
            "Connected to chain {} as {:?}",
            chain_id,
            key.address()
        );

        Ok(Self {
            node,
            key,
            chain_id,
            policy,
            builder,
            tracker,
            submitter,
        })
    }

    /// Open a session from loaded settings, using the ethers node client
    pub async fn from_settings(settings: &Settings) -> TxResult<Self> {
        let node = Arc::new(EthersNodeClient::new(settings.node.clone())?);
        let wallet = load_wallet(&settings.wallet)?;
        Self::connect(
            node,
            Arc::new(wallet),
            settings.tx.clone(),
            settings.node.expected_chain_id,
        )
        .await
    }

    async fn fetch_chain_id(
        node: &dyn NodeClient,
        expected: Option<ChainId>,
    ) -> TxResult<ChainId> {
        let reported = node
            .chain_id()
            .await
            .map_err(|e| TxError::UnknownChain(format!("node did not report a chain id: {}", e)))?;

        if reported.is_zero() {
            return Err(TxError::UnknownChain("node reported chain id 0".to_string()));
        }
        if reported > U256::from(u64::MAX) {
            return Err(TxError::UnknownChain(format!(
                "chain id {} out of range",
                reported
            )));
        }

        let chain_id = reported.as_u64();
        match expected {
            Some(expected) if expected != chain_id => Err(TxError::UnknownChain(format!(
                "expected chain {}, node is on chain {}",
                expected, chain_id
            ))),
            _ => Ok(chain_id),
        }
    }

    pub fn address(&self) -> Address {
        self.key.address()
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn policy(&self) -> &TxPolicy {
        &self.policy
    }

    /// Balance of the session account
    pub async fn balance(&self) -> TxResult<U256> {
        self.node.balance(self.address()).await
    }

    pub async fn balance_of(&self, address: &str) -> TxResult<U256> {
        let address = parse_address(address)?;
        self.node.balance(address).await
    }

    pub async fn has_enough_balance(&self, amount: U256) -> TxResult<bool> {
        Ok(self.balance().await? >= amount)
    }

    /// Gas limit and legacy price for `intent`
    pub async fn resolve_gas(&self, intent: &TxIntent, hints: &GasHints) -> TxResult<GasParams> {
        self.builder
            .gas_resolver()
            .resolve(hints.gas_limit, hints.gas_price, intent)
            .await
    }

    pub async fn build(&self, intent: &TxIntent, hints: &GasHints) -> TxResult<SignedTransaction> {
        self.builder.build(intent, hints).await
    }

    /// Broadcast once, without retries
    pub async fn submit(&self, signed: &SignedTransaction) -> TxResult<H256> {
        self.submitter.broadcaster().submit(signed).await
    }

    pub async fn await_confirmation(&self, hash: H256, timeout: Duration) -> TxResult<Receipt> {
        self.tracker.await_confirmation(hash, timeout).await
    }

    pub async fn await_confirmation_with_cancel(
        &self,
        hash: H256,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TxResult<Receipt> {
        self.tracker
            .await_confirmation_with_cancel(hash, timeout, cancel)
            .await
    }

    /// Build, sign, broadcast and confirm `intent`.
    ///
    /// Fails with `InsufficientFunds` before anything is broadcast when the
    /// balance cannot cover `value + gas_limit * price`.
    pub async fn send(&self, intent: &TxIntent, hints: &GasHints) -> TxResult<Receipt> {
        self.send_with_cancel(intent, hints, &CancellationToken::new())
            .await
    }

    /// [`Self::send`] whose confirmation wait stops once `cancel` fires
    pub async fn send_with_cancel(
        &self,
        intent: &TxIntent,
        hints: &GasHints,
        cancel: &CancellationToken,
    ) -> TxResult<Receipt> {
        let gas = self.resolve_gas(intent, hints).await?;
        let balance = self.balance().await?;
        Self::ensure_funds(balance, gas.total_cost(intent.value))?;

        // reuse the resolved limit and price rather than querying twice
        let hints = GasHints {
            gas_limit: gas.gas_limit,
            gas_price: Some(gas.fee.price_cap()),
            ..hints.clone()
        };
        let signed = self.builder.build(intent, &hints).await?;
        // a dynamic fee cap can exceed the legacy quote
        Self::ensure_funds(balance, signed.pending().gas.total_cost(intent.value))?;

        self.send_signed_with_cancel(&signed, cancel).await
    }

    /// Broadcast with retries and wait for the receipt, bumping the fee once
    /// on timeout when the policy allows it
    pub async fn send_signed(&self, signed: &SignedTransaction) -> TxResult<Receipt> {
        self.send_signed_with_cancel(signed, &CancellationToken::new())
            .await
    }

    pub async fn send_signed_with_cancel(
        &self,
        signed: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> TxResult<Receipt> {
        let hash = self.send_with_retry(signed).await?;

        match self
            .tracker
            .await_confirmation_with_cancel(hash, self.policy.confirmation_timeout(), cancel)
            .await
        {
            Err(TxError::Timeout { waited_secs, .. }) if self.policy.bump_on_timeout => {
                warn!(
                    "Transaction {:?} stalled for {}s, bumping fee by {}%",
                    hash, waited_secs, self.policy.fee_bump_percent
                );
                self.submitter
                    .send_with_fee_bump_with_cancel(signed, cancel)
                    .await
            }
            result => result,
        }
    }

    /// Send `amount` wei to `to`
    pub async fn transfer(&self, to: &str, amount: U256) -> TxResult<Receipt> {
        if amount.is_zero() {
            return Err(TxError::InvalidAmount(
                "transfer amount must be greater than zero".to_string(),
            ));
        }
        let intent = TxIntent::transfer(to, amount)?;
        self.send(&intent, &GasHints::default()).await
    }

    pub async fn send_with_retry(&self, signed: &SignedTransaction) -> TxResult<H256> {
        self.submitter
            .send_with_retry(signed, self.policy.max_submit_attempts)
            .await
    }

    pub async fn send_with_fee_bump(&self, stalled: &SignedTransaction) -> TxResult<Receipt> {
        self.submitter.send_with_fee_bump(stalled).await
    }

    /// Fee charged for `signed`, or `None` while it is unmined.
    ///
    /// Nodes that omit the effective price are assumed to have charged the
    /// signed price cap.
    pub async fn transaction_fee(&self, signed: &SignedTransaction) -> TxResult<Option<U256>> {
        let receipt = self.tracker.poll_once(signed.hash()).await?;
        Ok(receipt.map(|receipt| {
            receipt
                .fee_paid()
                .unwrap_or_else(|| receipt.gas_used.saturating_mul(signed.fee().price_cap()))
        }))
    }

    /// Read-only execution from the session account
    pub async fn call(&self, intent: &TxIntent) -> TxResult<Bytes> {
        self.node.call(&intent.as_call(self.address())).await
    }

    /// Simulate `intent` before spending gas.
    ///
    /// Returns the gas estimate. Revert reasons surface as `Estimation`
    /// errors carrying the node message.
    pub async fn preflight(&self, intent: &TxIntent) -> TxResult<u64> {
        let call = intent.as_call(self.address());
        let gas = self.node.estimate_gas(&call).await?;
        self.node.call(&call).await?;
        debug!("Preflight passed, estimated gas {}", gas);
        Ok(gas)
    }

    pub async fn is_contract(&self, address: &str) -> TxResult<bool> {
        let address = parse_address(address)?;
        Ok(!self.node.code_at(address).await?.is_empty())
    }

    /// Call a view method and decode its outputs
    pub async fn call_method(
        &self,
        contract: &str,
        abi_json: &str,
        method: &str,
        args: &[Token],
    ) -> TxResult<Vec<Token>> {
        let data = abi::encode_call(abi_json, method, args)?;
        let intent = TxIntent::call(contract, data, U256::zero())?;
        let output = self.call(&intent).await?;
        abi::decode_result(abi_json, method, &output)
    }

    /// Encode a method call and send it
    pub async fn send_method(
        &self,
        contract: &str,
        abi_json: &str,
        method: &str,
        args: &[Token],
        value: U256,
        hints: &GasHints,
    ) -> TxResult<Receipt> {
        let data = abi::encode_call(abi_json, method, args)?;
        let intent = TxIntent::call(contract, data, value)?;
        self.send(&intent, hints).await
    }

    fn ensure_funds(have: U256, need: U256) -> TxResult<()> {
        if have < need {
            warn!("Insufficient balance: have {}, need {}", have, need);
            return Err(TxError::InsufficientFunds { have, need });
        }
        Ok(())
    }
}

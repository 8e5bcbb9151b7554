//! Transaction submission with blind retry and same-nonce fee bumps

use super::builder::TransactionBuilder;
use super::confirm::ConfirmationTracker;
use crate::chain::NodeClient;
use crate::config::TxPolicy;
use crate::error::{TxError, TxResult};
use crate::metrics;
use crate::types::{ChainId, Receipt, SignedTransaction};

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pushes signed bytes to the node
#[derive(Clone)]
pub struct Broadcaster {
    node: Arc<dyn NodeClient>,
    chain_id: ChainId,
}

impl Broadcaster {
    pub fn new(node: Arc<dyn NodeClient>, chain_id: ChainId) -> Self {
        Self { node, chain_id }
    }

    /// Broadcast once and return the content hash of `signed`
    pub async fn submit(&self, signed: &SignedTransaction) -> TxResult<H256> {
        let hash = signed.hash();
        let returned = self.node.broadcast(signed.raw().clone()).await?;
        if returned != hash {
            warn!(
                "Node reported hash {:?} for transaction {:?}, tracking the local hash",
                returned, hash
            );
        }

        metrics::record_tx_submitted(self.chain_id);
        info!(
            "Transaction sent: {:?} (nonce {}, chain {})",
            hash,
            signed.nonce(),
            self.chain_id
        );
        Ok(hash)
    }
}

/// Retry strategies layered over [`Broadcaster`]
pub struct RetrySubmitter {
    broadcaster: Broadcaster,
    builder: TransactionBuilder,
    tracker: Arc<ConfirmationTracker>,
    retry_backoff: Duration,
    fee_bump_percent: u64,
    confirmation_timeout: Duration,
}

impl RetrySubmitter {
    pub fn new(
        broadcaster: Broadcaster,
        builder: TransactionBuilder,
        tracker: Arc<ConfirmationTracker>,
    ) -> Self {
        Self {
            broadcaster,
            builder,
            tracker,
            retry_backoff: Duration::from_secs(1),
            fee_bump_percent: 20,
            confirmation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_policy(mut self, policy: &TxPolicy) -> Self {
        self.retry_backoff = policy.retry_backoff();
        self.fee_bump_percent = policy.fee_bump_percent;
        self.confirmation_timeout = policy.confirmation_timeout();
        self
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Resubmit the same signed bytes until the node accepts them.
    ///
    /// Waits `attempt x backoff` between attempts. Stops early on rejections
    /// that resubmitting cannot fix. An "already known" answer means an
    /// earlier attempt got through.
    pub async fn send_with_retry(
        &self,
        signed: &SignedTransaction,
        max_attempts: u32,
    ) -> TxResult<H256> {
        let max_attempts = max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.broadcaster.submit(signed).await {
                Ok(hash) => {
                    if attempt > 1 {
                        info!(
                            "Transaction {:?} accepted on attempt {}/{}",
                            hash, attempt, max_attempts
                        );
                    }
                    return Ok(hash);
                }
                Err(e) if e.is_already_known() => {
                    debug!("Transaction {:?} already known to the node", signed.hash());
                    return Ok(signed.hash());
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "Submission attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, backoff
                    );
                    metrics::record_submit_retry(self.builder.chain_id());
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(
                        "Submission of {:?} failed after {} attempt(s): {}",
                        signed.hash(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Delay after the `attempt`-th failure, saturating instead of overflowing
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }

    /// Re-sign `stalled` at the same nonce with every price raised by the
    /// configured percentage
    pub fn bump(&self, stalled: &SignedTransaction) -> TxResult<SignedTransaction> {
        if stalled.from() != self.builder.address() {
            return Err(TxError::Signing(format!(
                "cannot replace a transaction from {:?} with key {:?}",
                stalled.from(),
                self.builder.address()
            )));
        }

        let fee = stalled.fee().bumped(self.fee_bump_percent);
        let replacement = self.builder.sign(stalled.pending().with_fee(fee))?;
        metrics::record_fee_bump(self.builder.chain_id());

        info!(
            "Replacing {:?} with {:?} at nonce {} (price cap {} -> {})",
            stalled.hash(),
            replacement.hash(),
            replacement.nonce(),
            stalled.fee().price_cap(),
            replacement.fee().price_cap()
        );
        Ok(replacement)
    }

    /// Single escalation step for a stalled transaction: bump, broadcast and
    /// wait for the replacement.
    ///
    /// Whichever of the two ends up mined decides the result. A rejected
    /// replacement is surfaced unless the original has been mined meanwhile.
    pub async fn send_with_fee_bump(&self, stalled: &SignedTransaction) -> TxResult<Receipt> {
        self.send_with_fee_bump_with_cancel(stalled, &CancellationToken::new())
            .await
    }

    /// Like [`Self::send_with_fee_bump`], but `cancel` stops the wait for the
    /// replacement
    pub async fn send_with_fee_bump_with_cancel(
        &self,
        stalled: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> TxResult<Receipt> {
        let replacement = self.bump(stalled)?;

        if let Err(e) = self.broadcaster.submit(&replacement).await {
            warn!("Replacement for {:?} rejected: {}", stalled.hash(), e);
            return match self.original_outcome(stalled).await {
                Some(outcome) => outcome,
                None => Err(e),
            };
        }

        match self
            .tracker
            .await_confirmation_with_cancel(replacement.hash(), self.confirmation_timeout, cancel)
            .await
        {
            Err(e) if e.is_outcome_unknown() => match self.original_outcome(stalled).await {
                Some(outcome) => outcome,
                None => Err(e),
            },
            result => result,
        }
    }

    /// Terminal result of `stalled` if it has been mined
    async fn original_outcome(&self, stalled: &SignedTransaction) -> Option<TxResult<Receipt>> {
        match self.tracker.poll_once(stalled.hash()).await {
            Ok(Some(_)) => {
                info!("Original transaction {:?} was mined", stalled.hash());
                Some(
                    self.tracker
                        .await_confirmation(stalled.hash(), self.confirmation_timeout)
                        .await,
                )
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Could not check original {:?}: {}", stalled.hash(), e);
                None
            }
        }
    }
}

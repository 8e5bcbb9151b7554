//! Confirmation tracking
//!
//! Polls the node for a receipt on a fixed interval until the transaction is
//! mined, the deadline passes, or the caller cancels. Mined outcomes are
//! cached per hash so repeated waits are answered without touching the node.

use crate::chain::NodeClient;
use crate::config::TxPolicy;
use crate::error::{TxError, TxResult};
use crate::metrics;
use crate::types::{ChainId, Receipt};

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settled receipts kept per tracker before the oldest half is dropped
pub const DEFAULT_SETTLED_CAPACITY: usize = 1024;

/// Deadline used when `started + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Observes transactions until they reach a terminal state
pub struct ConfirmationTracker {
    node: Arc<dyn NodeClient>,
    chain_id: ChainId,
    poll_interval: Duration,
    /// Blocks that must include the receipt, counting its own block
    min_confirmations: u64,
    /// Terminal receipts by hash, tagged with their settle order
    settled: DashMap<H256, (u64, Receipt)>,
    settled_seq: AtomicU64,
    settled_capacity: usize,
}

impl ConfirmationTracker {
    pub fn new(node: Arc<dyn NodeClient>, chain_id: ChainId) -> Self {
        Self {
            node,
            chain_id,
            poll_interval: Duration::from_secs(1),
            min_confirmations: 1,
            settled: DashMap::new(),
            settled_seq: AtomicU64::new(0),
            settled_capacity: DEFAULT_SETTLED_CAPACITY,
        }
    }

    pub fn with_settled_capacity(mut self, capacity: usize) -> Self {
        self.settled_capacity = capacity.max(1);
        self
    }

    pub fn with_policy(mut self, policy: &TxPolicy) -> Self {
        self.poll_interval = policy.poll_interval();
        self.min_confirmations = policy.min_confirmations.max(1);
        self
    }

    /// Wait until `hash` is mined or `timeout` elapses.
    ///
    /// `Duration::MAX` waits until the receipt shows up.
    pub async fn await_confirmation(&self, hash: H256, timeout: Duration) -> TxResult<Receipt> {
        self.await_confirmation_with_cancel(hash, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`Self::await_confirmation`], but stops early once `cancel` fires.
    ///
    /// Cancellation is checked once per iteration and only interrupts the
    /// sleep between polls, never a receipt lookup in flight.
    pub async fn await_confirmation_with_cancel(
        &self,
        hash: H256,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TxResult<Receipt> {
        if let Some(receipt) = self.settled_receipt(hash) {
            debug!("Transaction {:?} already settled", hash);
            return Self::outcome(receipt);
        }

        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Stopped waiting for {:?} after {} polls", hash, polls);
                return Err(TxError::Cancelled { hash });
            }

            polls += 1;
            match self.node.receipt(hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.succeeded() {
                        warn!(
                            "Transaction {:?} reverted in block {}",
                            hash, receipt.block_number
                        );
                        metrics::record_tx_reverted(self.chain_id);
                        return self.settle(hash, receipt, started);
                    }

                    let confirmations = self.confirmations(&receipt).await?;
                    if confirmations >= self.min_confirmations {
                        info!(
                            "Transaction {:?} confirmed in block {} ({} confirmations)",
                            hash, receipt.block_number, confirmations
                        );
                        metrics::record_tx_confirmed(self.chain_id);
                        return self.settle(hash, receipt, started);
                    }

                    debug!(
                        "Transaction {:?} has {} / {} confirmations",
                        hash, confirmations, self.min_confirmations
                    );
                }
                Ok(None) => {
                    debug!("Transaction {:?} not mined yet (poll {})", hash, polls);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Receipt lookup for {:?} failed: {}", hash, e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_secs = started.elapsed().as_secs();
                warn!(
                    "Transaction {:?} not confirmed after {}s ({} polls)",
                    hash, waited_secs, polls
                );
                metrics::record_tx_timed_out(self.chain_id);
                return Err(TxError::Timeout { hash, waited_secs });
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopped waiting for {:?} after {} polls", hash, polls);
                    return Err(TxError::Cancelled { hash });
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Single receipt lookup, answered from the cache when possible
    pub async fn poll_once(&self, hash: H256) -> TxResult<Option<Receipt>> {
        if let Some(receipt) = self.settled_receipt(hash) {
            return Ok(Some(receipt));
        }
        self.node.receipt(hash).await
    }

    /// Terminal receipt seen earlier for `hash`, if any
    pub fn settled_receipt(&self, hash: H256) -> Option<Receipt> {
        self.settled.get(&hash).map(|entry| entry.value().1.clone())
    }

    /// Number of receipts currently cached
    pub fn settled_len(&self) -> usize {
        self.settled.len()
    }

    async fn confirmations(&self, receipt: &Receipt) -> TxResult<u64> {
        if self.min_confirmations <= 1 {
            return Ok(1);
        }
        match self.node.block_number().await {
            Ok(latest) => Ok((latest + 1).saturating_sub(receipt.block_number)),
            Err(e) if e.is_retryable() => {
                warn!("Block number lookup failed: {}", e);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn settle(&self, hash: H256, receipt: Receipt, started: Instant) -> TxResult<Receipt> {
        metrics::record_confirmation_latency(self.chain_id, started.elapsed().as_secs_f64());
        let seq = self.settled_seq.fetch_add(1, Ordering::Relaxed);
        self.settled.insert(hash, (seq, receipt.clone()));
        self.prune_settled();
        Self::outcome(receipt)
    }

    /// Drop the older half of the cache once it grows past capacity
    fn prune_settled(&self) {
        if self.settled.len() <= self.settled_capacity {
            return;
        }
        let mut entries: Vec<(u64, H256)> = self
            .settled
            .iter()
            .map(|entry| (entry.value().0, *entry.key()))
            .collect();
        entries.sort_unstable();
        let drop = entries.len() / 2;
        for (_, hash) in entries.into_iter().take(drop) {
            self.settled.remove(&hash);
        }
        debug!("Pruned {} settled receipts", drop);
    }

    fn outcome(receipt: Receipt) -> TxResult<Receipt> {
        if receipt.succeeded() {
            Ok(receipt)
        } else {
            Err(TxError::ExecutionFailed {
                hash: receipt.hash,
                block_number: receipt.block_number,
                gas_used: receipt.gas_used,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeClient;
    use crate::types::ReceiptStatus;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHAIN: ChainId = 31337;

    fn receipt(hash: H256, status: ReceiptStatus, block_number: u64) -> Receipt {
        Receipt {
            hash,
            status,
            block_number,
            gas_used: U256::from(21_000u64),
            effective_gas_price: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_wait_is_idempotent() {
        let hash = H256::repeat_byte(0xaa);
        let mut node = MockNodeClient::new();
        node.expect_broadcast().never();
        node.expect_receipt()
            .times(1)
            .returning(move |h| Ok(Some(receipt(h, ReceiptStatus::Success, 77))));

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        let first = tracker
            .await_confirmation(hash, Duration::from_secs(30))
            .await
            .unwrap();
        let second = tracker
            .await_confirmation(hash, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.block_number, 77);
        assert_eq!(first.gas_used, U256::from(21_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_receipt_is_execution_failure() {
        let hash = H256::repeat_byte(0xbb);
        let mut node = MockNodeClient::new();
        node.expect_broadcast().never();
        node.expect_receipt()
            .times(1)
            .returning(move |h| Ok(Some(receipt(h, ReceiptStatus::Failed, 123))));

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        for _ in 0..2 {
            let err = tracker
                .await_confirmation(hash, Duration::from_secs(30))
                .await
                .unwrap_err();
            match err {
                TxError::ExecutionFailed {
                    hash: failed,
                    block_number,
                    gas_used,
                } => {
                    assert_eq!(failed, hash);
                    assert_eq!(block_number, 123);
                    assert_eq!(gas_used, U256::from(21_000u64));
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_mined() {
        let hash = H256::repeat_byte(0xcc);
        let mut node = MockNodeClient::new();
        let mut calls = 0;
        node.expect_receipt().times(4).returning(move |h| {
            calls += 1;
            match calls {
                1 => Err(TxError::Network("connection reset".into())),
                2 | 3 => Ok(None),
                _ => Ok(Some(receipt(h, ReceiptStatus::Success, 5))),
            }
        });

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        let started = Instant::now();
        let confirmed = tracker
            .await_confirmation(hash, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(confirmed.block_number, 5);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_polling() {
        let hash = H256::repeat_byte(0xdd);
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut node = MockNodeClient::new();
        node.expect_receipt().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        let err = tracker
            .await_confirmation(hash, Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(err.is_outcome_unknown());
        assert!(matches!(err, TxError::Timeout { waited_secs: 30, .. }));
        // one poll per second, including both ends of the window
        assert_eq!(polls.load(Ordering::SeqCst), 31);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let hash = H256::repeat_byte(0xee);
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut node = MockNodeClient::new();
        node.expect_receipt().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            trigger.cancel();
        });

        let err = tracker
            .await_confirmation_with_cancel(hash, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::Cancelled { hash: h } if h == hash));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_confirmation_depth() {
        let hash = H256::repeat_byte(0x11);
        let mut node = MockNodeClient::new();
        node.expect_receipt()
            .times(3)
            .returning(move |h| Ok(Some(receipt(h, ReceiptStatus::Success, 100))));
        let mut latest = 99;
        node.expect_block_number().times(3).returning(move || {
            latest += 1;
            Ok(latest)
        });

        let policy = TxPolicy {
            min_confirmations: 3,
            ..TxPolicy::default()
        };
        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN).with_policy(&policy);
        let confirmed = tracker
            .await_confirmation(hash, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(confirmed.block_number, 100);
        assert!(tracker.settled_receipt(hash).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_waits_for_receipt() {
        let hash = H256::repeat_byte(0x22);
        let mut node = MockNodeClient::new();
        let mut calls = 0;
        node.expect_receipt().times(3).returning(move |h| {
            calls += 1;
            if calls < 3 {
                Ok(None)
            } else {
                Ok(Some(receipt(h, ReceiptStatus::Success, 9)))
            }
        });

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN);
        let confirmed = tracker
            .await_confirmation(hash, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(confirmed.block_number, 9);

        // settled hashes are answered from the cache, whatever the timeout
        let again = tracker.await_confirmation(hash, Duration::MAX).await.unwrap();
        assert_eq!(again, confirmed);
    }

    #[tokio::test]
    async fn test_settled_cache_is_bounded() {
        let mut node = MockNodeClient::new();
        node.expect_receipt()
            .returning(move |h| Ok(Some(receipt(h, ReceiptStatus::Success, 1))));

        let tracker = ConfirmationTracker::new(Arc::new(node), CHAIN).with_settled_capacity(4);
        for byte in 1..=5u8 {
            tracker
                .await_confirmation(H256::repeat_byte(byte), Duration::from_secs(30))
                .await
                .unwrap();
        }

        // the fifth receipt pushed the cache past 4, so the two oldest went
        assert_eq!(tracker.settled_len(), 3);
        assert!(tracker.settled_receipt(H256::repeat_byte(1)).is_none());
        assert!(tracker.settled_receipt(H256::repeat_byte(2)).is_none());
        assert!(tracker.settled_receipt(H256::repeat_byte(5)).is_some());
    }
}

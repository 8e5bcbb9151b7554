//! Error types for the transaction lifecycle

use ethers::types::{H256, U256};
use thiserror::Error;

/// Main error type for building, submitting and confirming transactions
#[derive(Error, Debug, Clone)]
pub enum TxError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The node refused to simulate the call. Carries the node message verbatim.
    #[error("Gas estimation error: {0}")]
    Estimation(String),

    #[error("Fee quote error: {0}")]
    Quote(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Submission rejected: {0}")]
    Submission(String),

    /// Not confirmed within the deadline. The transaction may still be mined.
    #[error("Timeout waiting for transaction {hash:?} after {waited_secs}s")]
    Timeout { hash: H256, waited_secs: u64 },

    /// Mined, but execution reverted. Gas was spent.
    #[error("Transaction {hash:?} reverted in block {block_number} (gas used {gas_used})")]
    ExecutionFailed {
        hash: H256,
        block_number: u64,
        gas_used: U256,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientFunds { have: U256, need: U256 },

    #[error("Invalid gas parameters: {0}")]
    InvalidGasParams(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Stopped waiting for transaction {hash:?}")]
    Cancelled { hash: H256 },

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TxError {
    /// Check if resubmitting the same signed bytes may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TxError::Network(_) => true,
            TxError::Submission(_) => {
                !(self.is_nonce_too_low() || self.is_insufficient_funds())
            }
            _ => false,
        }
    }

    /// Check if the on-chain outcome is still undecided
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, TxError::Timeout { .. } | TxError::Cancelled { .. })
    }

    pub fn is_revert(&self) -> bool {
        if matches!(self, TxError::ExecutionFailed { .. }) {
            return true;
        }
        self.message_contains(&["revert", "execution reverted", "VM execution error"])
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, TxError::InsufficientFunds { .. })
            || self.message_contains(&["insufficient funds"])
    }

    pub fn is_gas_limit(&self) -> bool {
        self.message_contains(&["gas limit", "out of gas", "intrinsic gas too low"])
    }

    pub fn is_nonce_too_low(&self) -> bool {
        self.message_contains(&["nonce too low"])
    }

    pub fn is_underpriced(&self) -> bool {
        self.message_contains(&["underpriced", "fee too low"])
    }

    pub fn is_already_known(&self) -> bool {
        self.message_contains(&["already known", "known transaction"])
    }

    fn message(&self) -> Option<&str> {
        match self {
            TxError::Estimation(m)
            | TxError::Quote(m)
            | TxError::Network(m)
            | TxError::Submission(m) => Some(m),
            _ => None,
        }
    }

    fn message_contains(&self, needles: &[&str]) -> bool {
        self.message()
            .map(|m| {
                let m = m.to_lowercase();
                needles.iter().any(|n| m.contains(&n.to_lowercase()))
            })
            .unwrap_or(false)
    }
}

/// Result type for transaction operations
pub type TxResult<T> = Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_classification() {
        let underpriced = TxError::Submission("replacement transaction underpriced".into());
        assert!(underpriced.is_underpriced());
        assert!(underpriced.is_retryable());

        let nonce = TxError::Submission("nonce too low: next nonce 7, tx nonce 5".into());
        assert!(nonce.is_nonce_too_low());
        assert!(!nonce.is_retryable());

        let funds = TxError::Submission("insufficient funds for gas * price + value".into());
        assert!(funds.is_insufficient_funds());
        assert!(!funds.is_retryable());
    }

    #[test]
    fn test_revert_classification() {
        let err = TxError::Estimation("execution reverted: ERC20: transfer amount exceeds balance".into());
        assert!(err.is_revert());
        assert!(!err.is_retryable());

        let failed = TxError::ExecutionFailed {
            hash: H256::zero(),
            block_number: 123,
            gas_used: U256::from(21_000u64),
        };
        assert!(failed.is_revert());
        assert!(!failed.is_outcome_unknown());
    }

    #[test]
    fn test_timeout_is_unknown_outcome() {
        let err = TxError::Timeout {
            hash: H256::zero(),
            waited_secs: 30,
        };
        assert!(err.is_outcome_unknown());
        assert!(!err.is_retryable());
        assert!(!err.is_revert());
    }
}

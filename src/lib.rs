//! EVM transaction lifecycle management
//!
//! Turns an intent (pay, call, deploy) into a signed, broadcast and confirmed
//! transaction:
//! - Gas resolution from hints or node estimates
//! - EIP-1559 building with automatic legacy fallback
//! - Submission with blind retry and same-nonce fee bumps
//! - Bounded receipt polling with cooperative cancellation

pub mod abi;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod token;
pub mod tx;
pub mod types;
pub mod units;
pub mod wallet;

pub use chain::{EthersNodeClient, NodeClient};
pub use client::TxClient;
pub use config::{GasPriceStrategy, Settings, TxPolicy};
pub use error::{TxError, TxResult};
pub use token::Erc20;
pub use tx::{Broadcaster, ConfirmationTracker, GasResolver, RetrySubmitter, TransactionBuilder};
pub use types::{
    is_valid_address, ChainId, FeeModel, GasHints, GasParams, PendingTransaction, Receipt,
    ReceiptStatus, SignedTransaction, TxIntent,
};
pub use wallet::KeyProvider;

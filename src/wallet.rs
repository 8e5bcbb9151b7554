//! Signing keys
//!
//! The core only needs an address and a raw hash signature. Key creation and
//! derivation are delegated to the ethers signer.

use crate::config::WalletConfig;
use crate::error::{TxError, TxResult};

use ethers::signers::coins_bip39::English;
use ethers::signers::{LocalWallet, MnemonicBuilder, Signer};
use ethers::types::{Address, Signature, H256};
use tracing::info;

/// Key capability consumed by the transaction builder
pub trait KeyProvider: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a 32-byte digest. `v` must be the recovery id offset by 27.
    fn sign_hash(&self, hash: H256) -> TxResult<Signature>;
}

impl KeyProvider for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    fn sign_hash(&self, hash: H256) -> TxResult<Signature> {
        LocalWallet::sign_hash(self, hash).map_err(|e| TxError::Signing(e.to_string()))
    }
}

/// Parse a hex private key, with or without `0x`
pub fn wallet_from_private_key(key: &str) -> TxResult<LocalWallet> {
    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| TxError::Signing(format!("Invalid private key: {}", e)))
}

/// Derive the key at `m/44'/60'/0'/0/{index}`
pub fn wallet_from_mnemonic(phrase: &str, index: u32) -> TxResult<LocalWallet> {
    MnemonicBuilder::<English>::default()
        .phrase(phrase.trim())
        .index(index)
        .map_err(|e| TxError::Signing(format!("Invalid derivation index {}: {}", index, e)))?
        .build()
        .map_err(|e| TxError::Signing(format!("Invalid mnemonic: {}", e)))
}

/// Load the wallet named by the configuration from the environment
pub fn load_wallet(config: &WalletConfig) -> TxResult<LocalWallet> {
    if let Some(ref var) = config.private_key_env {
        if let Ok(key) = std::env::var(var) {
            let wallet = wallet_from_private_key(&key)?;
            info!("Loaded wallet {:?} from {}", Signer::address(&wallet), var);
            return Ok(wallet);
        }
    }

    if let Some(ref var) = config.mnemonic_env {
        if let Ok(phrase) = std::env::var(var) {
            let wallet = wallet_from_mnemonic(&phrase, config.derivation_index)?;
            info!(
                "Derived wallet {:?} from {} at index {}",
                Signer::address(&wallet),
                var,
                config.derivation_index
            );
            return Ok(wallet);
        }
    }

    Err(TxError::Config(
        "No wallet configured. Set the variable named by wallet.private_key_env or wallet.mnemonic_env"
            .to_string(),
    ))
}

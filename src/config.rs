//! Configuration management for txflow
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub tx: TxPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_urls: Vec<String>,
    /// Refuse to run against a node reporting any other chain
    pub expected_chain_id: Option<u64>,
    #[serde(default = "default_provider_poll_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
    pub mnemonic_env: Option<String>,
    #[serde(default)]
    pub derivation_index: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    /// EIP-1559 first, legacy on failure
    #[default]
    Auto,
    Legacy,
    Eip1559,
}

/// Gas, polling and retry policy for one session
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TxPolicy {
    pub gas_price_strategy: GasPriceStrategy,
    /// Derived max fee = multiplier x suggested legacy price
    pub max_fee_multiplier: u64,
    /// Headroom added to estimated gas limits. Hints are never buffered.
    pub gas_limit_buffer_percent: u64,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub min_confirmations: u64,
    pub max_submit_attempts: u32,
    pub retry_backoff_ms: u64,
    pub fee_bump_percent: u64,
    pub bump_on_timeout: bool,
}

impl Default for TxPolicy {
    fn default() -> Self {
        Self {
            gas_price_strategy: GasPriceStrategy::Auto,
            max_fee_multiplier: 2,
            gas_limit_buffer_percent: 0,
            poll_interval_ms: 1_000,
            confirmation_timeout_secs: 30,
            min_confirmations: 1,
            max_submit_attempts: 3,
            retry_backoff_ms: 1_000,
            fee_bump_percent: 20,
            bump_on_timeout: false,
        }
    }
}

impl TxPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("tx.poll_interval_ms must be greater than zero");
        }
        if self.confirmation_timeout_secs == 0 {
            anyhow::bail!("tx.confirmation_timeout_secs must be greater than zero");
        }
        if self.min_confirmations == 0 {
            anyhow::bail!("tx.min_confirmations must be at least 1");
        }
        if self.max_submit_attempts == 0 {
            anyhow::bail!("tx.max_submit_attempts must be at least 1");
        }
        if self.max_fee_multiplier == 0 {
            anyhow::bail!("tx.max_fee_multiplier must be greater than zero");
        }
        Ok(())
    }
}

fn default_provider_poll_ms() -> u64 {
    1_000
}

impl Settings {
    /// Load settings from the file named by `TXFLOW_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_path(&config_path)
    }

    /// Load settings from an explicit path
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.rpc_urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("node.rpc_urls must contain at least one URL");
        }
        if self.node.expected_chain_id == Some(0) {
            anyhow::bail!("node.expected_chain_id must not be zero");
        }
        if self.wallet.private_key_env.is_none() && self.wallet.mnemonic_env.is_none() {
            tracing::warn!("No wallet source configured - only read-only operations will work");
        }
        self.tx.validate()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    const MINIMAL: &str = r#"
[node]
rpc_urls = ["http://127.0.0.1:8545"]

[wallet]
private_key_env = "TXFLOW_KEY"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TXFLOW_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TXFLOW_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_toml(MINIMAL).unwrap();
        assert_eq!(settings.tx, TxPolicy::default());
        assert_eq!(settings.tx.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.tx.confirmation_timeout(), Duration::from_secs(30));
        assert_eq!(settings.tx.fee_bump_percent, 20);
        assert_eq!(settings.node.expected_chain_id, None);
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("TXFLOW_TEST_RPC", "http://10.0.0.1:8545");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[node]
rpc_urls = ["${{TXFLOW_TEST_RPC}}", "http://10.0.0.2:8545"]
expected_chain_id = 11155111

[wallet]
mnemonic_env = "TXFLOW_MNEMONIC"
derivation_index = 3

[tx]
gas_price_strategy = "legacy"
confirmation_timeout_secs = 120
bump_on_timeout = true
"#
        )
        .unwrap();

        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.node.rpc_urls[0], "http://10.0.0.1:8545");
        assert_eq!(settings.node.expected_chain_id, Some(11155111));
        assert_eq!(settings.wallet.derivation_index, 3);
        assert_eq!(settings.tx.gas_price_strategy, GasPriceStrategy::Legacy);
        assert_eq!(settings.tx.confirmation_timeout_secs, 120);
        assert!(settings.tx.bump_on_timeout);
        // untouched fields keep their defaults
        assert_eq!(settings.tx.max_submit_attempts, 3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert_ok!(Settings::from_toml(MINIMAL));

        let no_urls = MINIMAL.replace("[\"http://127.0.0.1:8545\"]", "[]");
        assert_err!(Settings::from_toml(&no_urls));

        let zero_timeout = format!("{}\n[tx]\nconfirmation_timeout_secs = 0\n", MINIMAL);
        assert_err!(Settings::from_toml(&zero_timeout));

        let zero_attempts = format!("{}\n[tx]\nmax_submit_attempts = 0\n", MINIMAL);
        assert_err!(Settings::from_toml(&zero_attempts));
    }
}

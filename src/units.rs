//! Ether denominations
//!
//! Decimal strings are parsed exactly with `ethers::utils::parse_units`, never
//! through floating point. Formatting drops trailing zeros.

use crate::error::{TxError, TxResult};

use ethers::types::U256;
use ethers::utils::{format_units, parse_units, ParseUnits};

pub const ETHER_DECIMALS: u32 = 18;
pub const GWEI_DECIMALS: u32 = 9;

/// `"1.5"` ether in wei
pub fn parse_ether(amount: &str) -> TxResult<U256> {
    parse_decimals(amount, ETHER_DECIMALS)
}

/// `"30"` gwei in wei
pub fn parse_gwei(amount: &str) -> TxResult<U256> {
    parse_decimals(amount, GWEI_DECIMALS)
}

/// Decimal `amount` scaled by `10^decimals`, as used for token amounts
pub fn parse_decimals(amount: &str, decimals: u32) -> TxResult<U256> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(TxError::InvalidAmount("empty amount".to_string()));
    }
    match parse_units(amount, decimals) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(TxError::InvalidAmount(format!(
            "{} is negative",
            amount
        ))),
        Err(e) => Err(TxError::InvalidAmount(format!("{}: {}", amount, e))),
    }
}

/// Parse an amount with an optional unit suffix.
///
/// Accepts `1.5ether`, `1.5 eth`, `30gwei` and `100wei`. A bare number is wei.
pub fn parse_amount(input: &str) -> TxResult<U256> {
    let input = input.trim();
    let lower = input.to_ascii_lowercase();

    for (suffix, decimals) in [
        ("ether", ETHER_DECIMALS),
        ("eth", ETHER_DECIMALS),
        ("gwei", GWEI_DECIMALS),
        ("wei", 0),
    ] {
        if let Some(number) = lower.strip_suffix(suffix) {
            return parse_decimals(number, decimals);
        }
    }

    U256::from_dec_str(input).map_err(|e| TxError::InvalidAmount(format!("{}: {}", input, e)))
}

pub fn format_ether(wei: U256) -> String {
    format_decimals(wei, ETHER_DECIMALS).unwrap_or_else(|_| wei.to_string())
}

pub fn format_gwei(wei: U256) -> String {
    format_decimals(wei, GWEI_DECIMALS).unwrap_or_else(|_| wei.to_string())
}

/// `amount / 10^decimals` without trailing zeros
pub fn format_decimals(amount: U256, decimals: u32) -> TxResult<String> {
    let formatted = format_units(amount, decimals)
        .map_err(|e| TxError::InvalidAmount(format!("cannot format {}: {}", amount, e)))?;

    if !formatted.contains('.') {
        return Ok(formatted);
    }
    Ok(formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string())
}

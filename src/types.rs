//! Value types shared by the gas resolver, builder and confirmation tracker

use crate::error::{TxError, TxResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, Signature, TransactionRequest, H256, U256,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;

/// Chain identifier, fixed for the lifetime of a session
pub type ChainId = u64;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
}

/// Check that `address` is `0x` followed by exactly 40 hex digits
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// Parse an address, rejecting anything that fails the exact-length check
pub fn parse_address(address: &str) -> TxResult<Address> {
    if !is_valid_address(address) {
        return Err(TxError::InvalidAddress(address.to_string()));
    }
    Address::from_str(address).map_err(|e| TxError::InvalidAddress(format!("{}: {}", address, e)))
}

/// Case-insensitive comparison of two well-formed addresses
pub fn addresses_equal(a: &str, b: &str) -> bool {
    is_valid_address(a) && is_valid_address(b) && a.eq_ignore_ascii_case(b)
}

/// Fee model of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeModel {
    Legacy {
        gas_price: U256,
    },
    Dynamic {
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
    },
}

impl FeeModel {
    /// Highest price per gas this fee model can charge
    pub fn price_cap(&self) -> U256 {
        match self {
            FeeModel::Legacy { gas_price } => *gas_price,
            FeeModel::Dynamic {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, FeeModel::Dynamic { .. })
    }

    /// Raise every price component by `percent`, rounding up
    pub fn bumped(&self, percent: u64) -> FeeModel {
        match self {
            FeeModel::Legacy { gas_price } => FeeModel::Legacy {
                gas_price: bump(*gas_price, percent),
            },
            FeeModel::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => {
                let tip = bump(*max_priority_fee_per_gas, percent);
                let cap = bump(*max_fee_per_gas, percent).max(tip);
                FeeModel::Dynamic {
                    max_priority_fee_per_gas: tip,
                    max_fee_per_gas: cap,
                }
            }
        }
    }
}

/// `value + ceil(value * percent / 100)`, and never less than `value + 1`
fn bump(value: U256, percent: u64) -> U256 {
    let scaled = value.saturating_mul(U256::from(percent));
    let mut increase = scaled / 100;
    if scaled % 100 != U256::zero() {
        increase += U256::one();
    }
    value.saturating_add(increase.max(U256::one()))
}

/// Resolved gas limit and fee model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub fee: FeeModel,
}

impl GasParams {
    pub fn legacy(gas_limit: u64, gas_price: U256) -> Self {
        Self {
            gas_limit,
            fee: FeeModel::Legacy { gas_price },
        }
    }

    pub fn dynamic(gas_limit: u64, max_priority_fee_per_gas: U256, max_fee_per_gas: U256) -> Self {
        Self {
            gas_limit,
            fee: FeeModel::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            },
        }
    }

    pub fn validate(&self) -> TxResult<()> {
        if self.gas_limit == 0 {
            return Err(TxError::InvalidGasParams("gas limit must be greater than zero".into()));
        }
        match self.fee {
            FeeModel::Legacy { gas_price } if gas_price.is_zero() => Err(
                TxError::InvalidGasParams("gas price must be greater than zero".into()),
            ),
            FeeModel::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } if max_fee_per_gas < max_priority_fee_per_gas => {
                Err(TxError::InvalidGasParams(format!(
                    "max fee {} is below priority fee {}",
                    max_fee_per_gas, max_priority_fee_per_gas
                )))
            }
            _ => Ok(()),
        }
    }

    /// Worst-case gas cost: `gas_limit * price_cap`
    pub fn max_gas_cost(&self) -> U256 {
        U256::from(self.gas_limit).saturating_mul(self.fee.price_cap())
    }

    /// Worst-case total debit: `value + gas_limit * price_cap`
    pub fn total_cost(&self, value: U256) -> U256 {
        value.saturating_add(self.max_gas_cost())
    }
}

/// Caller-supplied overrides. A zero gas limit and `None` prices mean "auto".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasHints {
    pub gas_limit: u64,
    /// Feeds the legacy fee model only
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: Option<u64>,
}

impl GasHints {
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_dynamic_fees(mut self, max_priority_fee_per_gas: U256, max_fee_per_gas: U256) -> Self {
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }
}

/// High-level intent: where to send, how much, and with what payload.
/// An absent `to` means contract creation and `data` is the init code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl TxIntent {
    pub fn transfer(to: &str, value: U256) -> TxResult<Self> {
        Ok(Self {
            to: Some(parse_address(to)?),
            value,
            data: Bytes::default(),
        })
    }

    pub fn call(to: &str, data: impl Into<Bytes>, value: U256) -> TxResult<Self> {
        Ok(Self {
            to: Some(parse_address(to)?),
            value,
            data: data.into(),
        })
    }

    pub fn deploy(init_code: impl Into<Bytes>, value: U256) -> Self {
        Self {
            to: None,
            value,
            data: init_code.into(),
        }
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Read-only view of this intent, sent from `from`
    pub fn as_call(&self, from: Address) -> CallRequest {
        CallRequest {
            from: Some(from),
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }
}

/// Simulated or read-only call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl CallRequest {
    pub fn to_typed(&self) -> TypedTransaction {
        let mut tx = TransactionRequest::new()
            .value(self.value)
            .data(self.data.clone());
        if let Some(from) = self.from {
            tx = tx.from(from);
        }
        if let Some(to) = self.to {
            tx = tx.to(to);
        }
        TypedTransaction::Legacy(tx)
    }
}

/// Unsigned, fully-resolved transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    pub gas: GasParams,
    pub chain_id: ChainId,
}

impl PendingTransaction {
    /// Typed envelope matching the fee model
    pub fn to_typed(&self, from: Address) -> TypedTransaction {
        match self.gas.fee {
            FeeModel::Legacy { gas_price } => {
                let mut tx = TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas.gas_limit)
                    .gas_price(gas_price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Legacy(tx)
            }
            FeeModel::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas.gas_limit)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .max_fee_per_gas(max_fee_per_gas)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Eip1559(tx)
            }
        }
    }

    /// Same transaction with a different fee model
    pub fn with_fee(&self, fee: FeeModel) -> Self {
        Self {
            gas: GasParams {
                gas_limit: self.gas.gas_limit,
                fee,
            },
            ..self.clone()
        }
    }
}

/// Signed transaction, identified by the keccak hash of its raw encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: PendingTransaction,
    from: Address,
    signature: Signature,
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub(crate) fn new(
        tx: PendingTransaction,
        from: Address,
        signature: Signature,
        raw: Bytes,
        hash: H256,
    ) -> Self {
        Self {
            tx,
            from,
            signature,
            raw,
            hash,
        }
    }

    pub fn pending(&self) -> &PendingTransaction {
        &self.tx
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn fee(&self) -> FeeModel {
        self.tx.gas.fee
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Raw bytes for `eth_sendRawTransaction`
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Execution outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: H256,
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub gas_used: U256,
    /// Price per gas actually charged, when the node reports it
    pub effective_gas_price: Option<U256>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    /// Fee charged for inclusion: `gas_used x effective_gas_price`
    pub fn fee_paid(&self) -> Option<U256> {
        self.effective_gas_price
            .map(|price| self.gas_used.saturating_mul(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("0x7161ada3EA6e53E5652A45988DdfF1cE595E09c2"));
        assert!(!is_valid_address("0x7161ada3EA6e53E5652A45988DdfF1cE595E09c"));
        assert!(!is_valid_address("7161ada3EA6e53E5652A45988DdfF1cE595E09c2"));
        assert!(!is_valid_address("0x7161ada3EA6e53E5652A45988DdfF1cE595E09c2a"));
        assert!(!is_valid_address("0x7161ada3EA6e53E5652A45988DdfF1cE595E09zz"));
    }

    #[test]
    fn test_address_equality_ignores_case() {
        assert!(addresses_equal(
            "0x7161ada3EA6e53E5652A45988DdfF1cE595E09c2",
            "0x7161ADA3EA6E53E5652A45988DDFF1CE595E09C2"
        ));
        assert!(!addresses_equal(
            "0x7161ada3EA6e53E5652A45988DdfF1cE595E09c",
            "0x7161ada3EA6e53E5652A45988DdfF1cE595E09c"
        ));
    }

    #[test]
    fn test_intent_rejects_malformed_address() {
        let err = TxIntent::transfer("0x1234", U256::one()).unwrap_err();
        assert!(matches!(err, TxError::InvalidAddress(_)));
    }

    #[test]
    fn test_gas_params_invariants() {
        assert!(GasParams::legacy(21_000, U256::from(1u64)).validate().is_ok());
        assert!(GasParams::legacy(0, U256::from(1u64)).validate().is_err());
        assert!(GasParams::legacy(21_000, U256::zero()).validate().is_err());
        assert!(GasParams::dynamic(21_000, U256::from(2u64), U256::from(2u64))
            .validate()
            .is_ok());
        assert!(GasParams::dynamic(21_000, U256::from(3u64), U256::from(2u64))
            .validate()
            .is_err());
    }

    #[test]
    fn test_total_cost() {
        let params = GasParams::legacy(21_000, U256::from(50u64));
        assert_eq!(params.total_cost(U256::from(900_000u64)), U256::from(1_950_000u64));
    }

    #[test]
    fn test_bump_raises_by_twenty_percent() {
        let bumped = FeeModel::Legacy {
            gas_price: U256::from(100u64),
        }
        .bumped(20);
        assert_eq!(
            bumped,
            FeeModel::Legacy {
                gas_price: U256::from(120u64)
            }
        );

        // rounds up and never stays flat
        assert_eq!(bump(U256::from(7u64), 20), U256::from(9u64));
        assert_eq!(bump(U256::zero(), 20), U256::one());
    }

    #[test]
    fn test_dynamic_bump_keeps_cap_above_tip() {
        let bumped = FeeModel::Dynamic {
            max_priority_fee_per_gas: U256::from(10u64),
            max_fee_per_gas: U256::from(10u64),
        }
        .bumped(20);
        match bumped {
            FeeModel::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => {
                assert_eq!(max_priority_fee_per_gas, U256::from(12u64));
                assert!(max_fee_per_gas >= max_priority_fee_per_gas);
            }
            FeeModel::Legacy { .. } => panic!("bump changed the fee model"),
        }
    }

    #[test]
    fn test_contract_creation_has_no_recipient() {
        let intent = TxIntent::deploy(vec![0x60u8, 0x80], U256::zero());
        assert!(intent.is_contract_creation());
        let pending = PendingTransaction {
            to: intent.to,
            value: intent.value,
            data: intent.data.clone(),
            nonce: 0,
            gas: GasParams::legacy(100_000, U256::one()),
            chain_id: 1,
        };
        assert!(pending.to_typed(Address::zero()).to().is_none());
    }
}

//! ERC-20 token helpers built on the session's call and send paths

use crate::client::TxClient;
use crate::error::{TxError, TxResult};
use crate::types::{parse_address, GasHints, Receipt};

use ethers::abi::Token;
use ethers::types::{Address, U256};

/// Standard ERC-20 interface: metadata, balances, allowances and transfers
pub const ERC20_ABI: &str = r#"[
    {"type":"function","name":"name","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"symbol","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"decimals","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"uint8"}]},
    {"type":"function","name":"totalSupply","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"allowance","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"},{"name":"spender","type":"address"}],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]},
    {"type":"function","name":"transferFrom","stateMutability":"nonpayable",
     "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
               {"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]},
    {"type":"function","name":"approve","stateMutability":"nonpayable",
     "inputs":[{"name":"spender","type":"address"},{"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]}
]"#;

/// Handle on one token contract, borrowing the session that talks to it
pub struct Erc20<'a> {
    client: &'a TxClient,
    address: String,
}

impl<'a> Erc20<'a> {
    pub fn new(client: &'a TxClient, address: &str) -> TxResult<Self> {
        parse_address(address)?;
        Ok(Self {
            client,
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn name(&self) -> TxResult<String> {
        self.view_string("name").await
    }

    pub async fn symbol(&self) -> TxResult<String> {
        self.view_string("symbol").await
    }

    pub async fn decimals(&self) -> TxResult<u8> {
        let value = self.view_uint("decimals", &[]).await?;
        if value > U256::from(u8::MAX) {
            return Err(TxError::Abi(format!("decimals {} out of range", value)));
        }
        Ok(value.as_u32() as u8)
    }

    pub async fn total_supply(&self) -> TxResult<U256> {
        self.view_uint("totalSupply", &[]).await
    }

    pub async fn balance_of(&self, owner: &str) -> TxResult<U256> {
        let owner = address_token(owner)?;
        self.view_uint("balanceOf", &[owner]).await
    }

    pub async fn allowance(&self, owner: &str, spender: &str) -> TxResult<U256> {
        let args = [address_token(owner)?, address_token(spender)?];
        self.view_uint("allowance", &args).await
    }

    pub async fn transfer(&self, to: &str, amount: U256, hints: &GasHints) -> TxResult<Receipt> {
        let args = [address_token(to)?, Token::Uint(amount)];
        self.send("transfer", &args, hints).await
    }

    pub async fn transfer_from(
        &self,
        from: &str,
        to: &str,
        amount: U256,
        hints: &GasHints,
    ) -> TxResult<Receipt> {
        let args = [address_token(from)?, address_token(to)?, Token::Uint(amount)];
        self.send("transferFrom", &args, hints).await
    }

    pub async fn approve(
        &self,
        spender: &str,
        amount: U256,
        hints: &GasHints,
    ) -> TxResult<Receipt> {
        let args = [address_token(spender)?, Token::Uint(amount)];
        self.send("approve", &args, hints).await
    }

    async fn view(&self, method: &str, args: &[Token]) -> TxResult<Token> {
        self.client
            .call_method(&self.address, ERC20_ABI, method, args)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TxError::Abi(format!("{} returned nothing", method)))
    }

    async fn view_uint(&self, method: &str, args: &[Token]) -> TxResult<U256> {
        match self.view(method, args).await? {
            Token::Uint(value) => Ok(value),
            other => Err(TxError::Abi(format!("{} returned {:?}", method, other))),
        }
    }

    async fn view_string(&self, method: &str) -> TxResult<String> {
        match self.view(method, &[]).await? {
            Token::String(value) => Ok(value),
            other => Err(TxError::Abi(format!("{} returned {:?}", method, other))),
        }
    }

    async fn send(&self, method: &str, args: &[Token], hints: &GasHints) -> TxResult<Receipt> {
        self.client
            .send_method(&self.address, ERC20_ABI, method, args, U256::zero(), hints)
            .await
    }
}

fn address_token(address: &str) -> TxResult<Token> {
    let address: Address = parse_address(address)?;
    Ok(Token::Address(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeClient;
    use crate::config::{GasPriceStrategy, TxPolicy};
    use crate::tx::testing::RECIPIENT;
    use crate::types::ReceiptStatus;
    use crate::wallet::tests::dev_wallet;
    use ethers::abi::encode;
    use ethers::types::{Bytes, Transaction};
    use ethers::utils::rlp::{Decodable, Rlp};
    use std::sync::Arc;

    const CHAIN: u64 = 31337;
    const TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const SPENDER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    async fn client(mut node: MockNodeClient) -> TxClient {
        node.expect_chain_id().returning(|| Ok(U256::from(CHAIN)));
        let policy = TxPolicy {
            gas_price_strategy: GasPriceStrategy::Legacy,
            ..TxPolicy::default()
        };
        TxClient::connect(Arc::new(node), Arc::new(dev_wallet()), policy, Some(CHAIN))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_metadata_and_balances() {
        let token_address = parse_address(TOKEN).unwrap();
        let mut node = MockNodeClient::new();
        node.expect_call()
            .withf(move |call| call.to == Some(token_address))
            .returning(|call| {
                let output = match &call.data[..4] {
                    [0x06, 0xfd, 0xde, 0x03] => encode(&[Token::String("Test Token".into())]),
                    [0x95, 0xd8, 0x9b, 0x41] => encode(&[Token::String("TST".into())]),
                    [0x31, 0x3c, 0xe5, 0x67] => encode(&[Token::Uint(U256::from(6u64))]),
                    [0x18, 0x16, 0x0d, 0xdd] => encode(&[Token::Uint(U256::from(1_000_000u64))]),
                    [0x70, 0xa0, 0x82, 0x31] => encode(&[Token::Uint(U256::from(250u64))]),
                    [0xdd, 0x62, 0xed, 0x3e] => encode(&[Token::Uint(U256::from(40u64))]),
                    other => panic!("unexpected selector {:?}", other),
                };
                Ok(Bytes::from(output))
            });

        let client = client(node).await;
        let token = Erc20::new(&client, TOKEN).unwrap();

        assert_eq!(token.name().await.unwrap(), "Test Token");
        assert_eq!(token.symbol().await.unwrap(), "TST");
        assert_eq!(token.decimals().await.unwrap(), 6);
        assert_eq!(token.total_supply().await.unwrap(), U256::from(1_000_000u64));
        assert_eq!(token.balance_of(RECIPIENT).await.unwrap(), U256::from(250u64));
        assert_eq!(
            token.allowance(RECIPIENT, SPENDER).await.unwrap(),
            U256::from(40u64)
        );
    }

    #[tokio::test]
    async fn test_approve_sends_to_token_contract() {
        let token_address = parse_address(TOKEN).unwrap();
        let mut node = MockNodeClient::new();
        node.expect_balance().returning(|_| Ok(U256::exp10(18)));
        node.expect_broadcast()
            .withf(move |raw| {
                let tx = Transaction::decode(&Rlp::new(raw.as_ref())).unwrap();
                tx.to == Some(token_address)
                    && tx.value.is_zero()
                    && tx.input[..4] == [0x09, 0x5e, 0xa7, 0xb3]
                    && tx.input.len() == 4 + 64
            })
            .times(1)
            .returning(|raw| Ok(Transaction::decode(&Rlp::new(raw.as_ref())).unwrap().hash));
        node.expect_receipt().returning(|h| {
            Ok(Some(Receipt {
                hash: h,
                status: ReceiptStatus::Success,
                block_number: 3,
                gas_used: U256::from(46_000u64),
                effective_gas_price: Some(U256::from(5u64)),
            }))
        });

        let client = client(node).await;
        let token = Erc20::new(&client, TOKEN).unwrap();
        let hints = GasHints::default()
            .with_gas_limit(60_000)
            .with_gas_price(U256::from(5u64))
            .with_nonce(0);

        let receipt = token.approve(SPENDER, U256::MAX, &hints).await.unwrap();
        assert_eq!(receipt.fee_paid(), Some(U256::from(230_000u64)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_addresses() {
        let mut node = MockNodeClient::new();
        node.expect_call().never();
        let client = client(node).await;

        assert!(matches!(
            Erc20::new(&client, "0x1234"),
            Err(TxError::InvalidAddress(_))
        ));
        let token = Erc20::new(&client, TOKEN).unwrap();
        assert!(matches!(
            token.balance_of("not an address").await,
            Err(TxError::InvalidAddress(_))
        ));
    }
}

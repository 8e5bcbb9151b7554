//! Contract call encoding over `ethers::abi`

use crate::error::{TxError, TxResult};

use ethers::abi::{Abi, Function, Token};
use ethers::types::Bytes;

/// Parse a JSON ABI (the array form emitted by solc)
pub fn parse_abi(abi_json: &str) -> TxResult<Abi> {
    serde_json::from_str(abi_json).map_err(|e| TxError::Abi(format!("Invalid ABI: {}", e)))
}

fn function<'a>(abi: &'a Abi, method: &str) -> TxResult<&'a Function> {
    abi.function(method)
        .map_err(|e| TxError::Abi(format!("{}: {}", method, e)))
}

/// Selector followed by the ABI-encoded arguments
pub fn encode_call(abi_json: &str, method: &str, args: &[Token]) -> TxResult<Bytes> {
    let abi = parse_abi(abi_json)?;
    let data = function(&abi, method)?
        .encode_input(args)
        .map_err(|e| TxError::Abi(format!("Cannot encode {}: {}", method, e)))?;
    Ok(data.into())
}

/// Decode the return data of `method`
pub fn decode_result(abi_json: &str, method: &str, output: &[u8]) -> TxResult<Vec<Token>> {
    let abi = parse_abi(abi_json)?;
    function(&abi, method)?
        .decode_output(output)
        .map_err(|e| TxError::Abi(format!("Cannot decode {} output: {}", method, e)))
}

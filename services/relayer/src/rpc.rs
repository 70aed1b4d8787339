//! JSON-RPC access to the execution node.
//!
//! [`EthRpc`] is the contract the relay core consumes; [`HttpRpcClient`] is
//! the production implementation speaking JSON-RPC over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::authorization::Authorization;
use crate::codec::{
    parse_hex_bytes, to_hex_prefixed, u128_from_quantity, u64_from_quantity, Address,
};
use crate::error::{RelayError, RelayResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

impl BlockTag {
    fn as_str(self) -> &'static str {
        match self {
            BlockTag::Latest => "latest",
            BlockTag::Pending => "pending",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    /// `false` when execution reverted.
    pub status: bool,
}

/// Gas estimation input for a sponsored transaction.
#[derive(Clone, Debug)]
pub struct EstimateRequest<'a> {
    pub from: Address,
    pub to: Address,
    pub data: &'a [u8],
    pub authorization_list: &'a [Authorization],
}

#[async_trait]
pub trait EthRpc: Send + Sync {
    async fn chain_id(&self) -> RelayResult<u64>;

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RelayResult<u64>;

    async fn code(&self, address: Address) -> RelayResult<Vec<u8>>;

    async fn balance(&self, address: Address) -> RelayResult<u128>;

    /// Base fee of the latest block.
    async fn base_fee(&self) -> RelayResult<u128>;

    async fn max_priority_fee(&self) -> RelayResult<u128>;

    async fn estimate_gas(&self, request: EstimateRequest<'_>) -> RelayResult<u64>;

    /// Returns the transaction hash reported by the node.
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> RelayResult<String>;

    /// `None` while the transaction is not yet mined.
    async fn transaction_receipt(&self, hash: &str) -> RelayResult<Option<TransactionReceipt>>;
}

pub struct HttpRpcClient {
    http: reqwest::Client,
    url: url::Url,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: url::Url, timeout: Duration) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RelayError::RpcTransport {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_json_rpc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, method: &'static str, params: Value) -> RelayResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_json_rpc_id(),
            "method": method,
            "params": params,
        });
        tracing::trace!(method, "sending rpc request");

        let response = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|err| RelayError::RpcTransport {
                message: err.to_string(),
            })?;
        let value: Value = response.json().await.map_err(|err| RelayError::RpcTransport {
            message: err.to_string(),
        })?;
        extract_result(value)
    }
}

fn extract_result(value: Value) -> RelayResult<Value> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32_000);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(RelayError::Rpc { code, message });
    }

    value
        .get("result")
        .cloned()
        .ok_or(RelayError::RpcResultTypeMismatch { expected: "result" })
}

fn expect_str<'a>(value: &'a Value, expected: &'static str) -> RelayResult<&'a str> {
    value
        .as_str()
        .ok_or(RelayError::RpcResultTypeMismatch { expected })
}

pub(crate) fn parse_receipt(value: &Value) -> RelayResult<Option<TransactionReceipt>> {
    if value.is_null() {
        return Ok(None);
    }
    let object = value.as_object().ok_or(RelayError::RpcResultTypeMismatch {
        expected: "receipt object",
    })?;
    // Some nodes return a receipt skeleton for pending transactions.
    let Some(block_number) = object.get("blockNumber").and_then(Value::as_str) else {
        return Ok(None);
    };
    let block_number = u64_from_quantity("blockNumber", block_number)?;
    let transaction_hash = object
        .get("transactionHash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = match object.get("status").and_then(Value::as_str) {
        Some(status) => u64_from_quantity("status", status)? == 1,
        // Pre-Byzantium receipts carry a state root instead.
        None => true,
    };
    Ok(Some(TransactionReceipt {
        transaction_hash,
        block_number,
        status,
    }))
}

#[async_trait]
impl EthRpc for HttpRpcClient {
    async fn chain_id(&self) -> RelayResult<u64> {
        let value = self.request("eth_chainId", json!([])).await?;
        u64_from_quantity("chainId", expect_str(&value, "hex string")?)
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RelayResult<u64> {
        let value = self
            .request(
                "eth_getTransactionCount",
                json!([address.to_checksum(), tag.as_str()]),
            )
            .await?;
        u64_from_quantity("nonce", expect_str(&value, "hex string")?)
    }

    async fn code(&self, address: Address) -> RelayResult<Vec<u8>> {
        let value = self
            .request("eth_getCode", json!([address.to_checksum(), "latest"]))
            .await?;
        parse_hex_bytes(expect_str(&value, "hex string")?)
    }

    async fn balance(&self, address: Address) -> RelayResult<u128> {
        let value = self
            .request("eth_getBalance", json!([address.to_checksum(), "latest"]))
            .await?;
        u128_from_quantity("balance", expect_str(&value, "hex string")?)
    }

    async fn base_fee(&self) -> RelayResult<u128> {
        let value = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = value
            .get("baseFeePerGas")
            .and_then(Value::as_str)
            .ok_or(RelayError::RpcResultTypeMismatch {
                expected: "baseFeePerGas",
            })?;
        u128_from_quantity("baseFeePerGas", base_fee)
    }

    async fn max_priority_fee(&self) -> RelayResult<u128> {
        let value = self
            .request("eth_maxPriorityFeePerGas", json!([]))
            .await?;
        u128_from_quantity("maxPriorityFeePerGas", expect_str(&value, "hex string")?)
    }

    async fn estimate_gas(&self, request: EstimateRequest<'_>) -> RelayResult<u64> {
        let authorization_list: Vec<Value> = request
            .authorization_list
            .iter()
            .map(Authorization::to_rpc_json)
            .collect();
        let value = self
            .request(
                "eth_estimateGas",
                json!([{
                    "from": request.from.to_checksum(),
                    "to": request.to.to_checksum(),
                    "value": "0x0",
                    "data": to_hex_prefixed(request.data),
                    "authorizationList": authorization_list,
                }]),
            )
            .await?;
        u64_from_quantity("gas", expect_str(&value, "hex string")?)
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> RelayResult<String> {
        let value = self
            .request("eth_sendRawTransaction", json!([to_hex_prefixed(raw_tx)]))
            .await?;
        expect_str(&value, "transaction hash").map(str::to_string)
    }

    async fn transaction_receipt(&self, hash: &str) -> RelayResult<Option<TransactionReceipt>> {
        let value = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        parse_receipt(&value)
    }
}

// Ethereum JSON-RPC over HTTP

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use super::{Address, ChainRpc, LedgerError, LedgerResult, TxHash, TxReceipt};

pub struct JsonRpcClient {
    pub url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { url: url.into(), client, next_id: AtomicU64::new(1) }
    }

    async fn call(&self, method: &str, params: Value) -> LedgerResult<Value> {
        if self.url.trim().is_empty() {
            return Err(LedgerError::Config("rpc url is not set".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(method = method, id = id, "rpc call");

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(LedgerError::from_rpc(err.code, err.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

pub fn parse_quantity(value: &Value) -> LedgerResult<u128> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("expected hex quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Decode(format!("quantity without 0x prefix: {}", text)))?;
    if digits.is_empty() {
        return Err(LedgerError::Decode("empty quantity".into()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| LedgerError::Decode(format!("quantity {}: {}", text, e)))
}

fn parse_u64(value: &Value) -> LedgerResult<u64> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity).map_err(|_| LedgerError::Decode(format!("quantity {} overflows u64", quantity)))
}

fn parse_hash(value: &Value) -> LedgerResult<TxHash> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("expected transaction hash, got {}", value)))?;
    text.parse().map_err(|_| LedgerError::Decode(format!("bad transaction hash {}", text)))
}

/// Receipt JSON to `TxReceipt`; `null` means not mined yet.
pub fn parse_receipt(value: &Value) -> LedgerResult<Option<TxReceipt>> {
    if value.is_null() {
        return Ok(None);
    }
    // Some nodes return a receipt stub for pending transactions.
    if value["blockNumber"].is_null() {
        return Ok(None);
    }
    Ok(Some(TxReceipt {
        tx_hash: parse_hash(&value["transactionHash"])?,
        block_number: parse_u64(&value["blockNumber"])?,
        success: parse_quantity(&value["status"])? == 1,
    }))
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn chain_id(&self) -> LedgerResult<u64> {
        parse_u64(&self.call("eth_chainId", json!([])).await?)
    }

    async fn pending_nonce(&self, account: &Address) -> LedgerResult<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([account.to_string(), "pending"]))
            .await?;
        parse_u64(&result)
    }

    async fn gas_price(&self) -> LedgerResult<u128> {
        parse_quantity(&self.call("eth_gasPrice", json!([])).await?)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash> {
        let result = self
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        parse_hash(&result)
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>> {
        let result = self
            .call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        parse_receipt(&result)
    }
}

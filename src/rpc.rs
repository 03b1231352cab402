/// Typed JSON-RPC wrapper over the Dogecoin node
///
/// Thin layer: every call posts a JSON-RPC 1.0 body with basic auth and
/// deserializes `result` into a typed struct. Node-side failures surface
/// as `Error::Rpc` carrying the node's message so broadcast callers can
/// classify them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSig {
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vin {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    pub coinbase: Option<String>,
    #[serde(rename = "scriptSig")]
    pub script_sig: Option<ScriptSig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vout {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// `getrawtransaction` with verbose=true.
#[derive(Debug, Clone, Deserialize)]
pub struct VerboseTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<Vin>,
    #[serde(default)]
    pub vout: Vec<Vout>,
    /// Absent while the transaction is mempool-only.
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: Option<i64>,
}

impl VerboseTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.iter().any(|v| v.coinbase.is_some())
    }
}

/// `getblock` with verbosity=2: full transaction objects.
#[derive(Debug, Clone, Deserialize)]
pub struct VerboseBlock {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub tx: Vec<VerboseTransaction>,
}

/// One `listunspent` row.
#[derive(Debug, Clone, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: String,
    /// Coin-denominated amount as the node reports it.
    pub amount: f64,
    #[serde(default)]
    pub confirmations: i64,
}

impl UnspentOutput {
    pub fn satoshis(&self) -> u64 {
        (self.amount * 100_000_000.0).round() as u64
    }
}

/// `gettransaction` result, trimmed to what the controller reads.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletTransaction {
    pub txid: String,
    pub confirmations: i64,
}

/// One `listtransactions` row.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTransactionsEntry {
    #[serde(default)]
    pub address: Option<String>,
    pub category: String,
    #[serde(default)]
    pub label: Option<String>,
    pub confirmations: i64,
    pub txid: String,
    #[serde(default)]
    pub time: Option<u64>,
}

/// The node surface the decoder, broadcaster and mint controller consume.
/// Tests drive the same code paths through an in-memory implementation.
#[allow(async_fn_in_trait)]
pub trait ChainRpc {
    async fn get_raw_transaction_verbose(&self, txid: &str) -> Result<VerboseTransaction>;
    async fn get_block_hash(&self, height: u64) -> Result<String>;
    async fn get_block_verbose(&self, hash: &str) -> Result<VerboseBlock>;
    async fn get_block_count(&self) -> Result<u64>;
    async fn send_raw_transaction(&self, hex: &str) -> Result<String>;
    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>>;
    async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction>;
    async fn get_raw_mempool(&self) -> Result<Vec<String>>;
    async fn list_transactions(&self, count: u32, skip: u32) -> Result<Vec<ListTransactionsEntry>>;
}

pub struct RpcClient {
    url: String,
    user: String,
    pass: String,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: String, user: String, pass: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url, user, pass, client }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&json!({
                "jsonrpc": "1.0",
                "id": "doginalsd",
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let body: Value = response.json().await?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| err.to_string());
            return Err(Error::Rpc(message));
        }

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Rpc(format!("{}: no result in RPC response", method)))?;

        serde_json::from_value(result)
            .map_err(|e| Error::Rpc(format!("{}: bad result shape: {}", method, e)))
    }
}

impl ChainRpc for RpcClient {
    async fn get_raw_transaction_verbose(&self, txid: &str) -> Result<VerboseTransaction> {
        self.call("getrawtransaction", json!([txid, true])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block_verbose(&self, hash: &str) -> Result<VerboseBlock> {
        self.call("getblock", json!([hash, 2])).await
    }

    async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", json!([])).await
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String> {
        self.call("sendrawtransaction", json!([hex])).await
    }

    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>> {
        self.call("listunspent", json!([0, 9_999_999, addresses])).await
    }

    async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction> {
        self.call("gettransaction", json!([txid, true])).await
    }

    async fn get_raw_mempool(&self) -> Result<Vec<String>> {
        self.call("getrawmempool", json!([])).await
    }

    async fn list_transactions(&self, count: u32, skip: u32) -> Result<Vec<ListTransactionsEntry>> {
        self.call("listtransactions", json!(["*", count, skip, true])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspent_satoshi_conversion() {
        let utxo = UnspentOutput {
            txid: "00".repeat(32),
            vout: 1,
            address: None,
            script_pub_key: "76a914".to_string(),
            amount: 69.12345678,
            confirmations: 3,
        };
        assert_eq!(utxo.satoshis(), 6_912_345_678);
    }

    #[test]
    fn test_verbose_tx_deserializes_mempool_shape() {
        // mempool transactions have no blockhash/confirmations
        let raw = serde_json::json!({
            "txid": "ab".repeat(32),
            "vin": [{"txid": "cd".repeat(32), "vout": 0,
                     "scriptSig": {"asm": "6582895 0 74", "hex": "00"}}],
            "vout": [{"value": 0.001, "n": 0, "scriptPubKey": {"hex": "a914"}}]
        });
        let tx: VerboseTransaction = serde_json::from_value(raw).unwrap();
        assert!(tx.blockhash.is_none());
        assert!(!tx.is_coinbase());
        assert_eq!(tx.vin[0].script_sig.as_ref().unwrap().asm, "6582895 0 74");
    }
}

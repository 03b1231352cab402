/// In-memory node double for driving the walker, broadcaster and mint
/// controller through the same code paths the live RPC client uses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::rpc::{
    ChainRpc, ListTransactionsEntry, ScriptSig, UnspentOutput, VerboseBlock, VerboseTransaction,
    Vin, Vout, WalletTransaction,
};

/// Scripted outcome for one `sendrawtransaction` call.
pub enum SendScript {
    Accept,
    Reject(String),
}

pub struct MockChain {
    pub txs: Mutex<HashMap<String, VerboseTransaction>>,
    /// height -> txids (blocks materialize lazily from the tx map)
    pub blocks: Mutex<BTreeMap<u64, Vec<String>>>,
    pub send_script: Mutex<VecDeque<SendScript>>,
    pub sent: Mutex<Vec<String>>,
    pub unspent: Mutex<Vec<UnspentOutput>>,
    /// txid -> confirmations for `gettransaction`
    pub confirmations: Mutex<HashMap<String, i64>>,
    pub wallet_history: Mutex<Vec<ListTransactionsEntry>>,
    pub mempool: Mutex<Vec<String>>,
    /// number of upcoming `listunspent` calls to fail
    pub fail_unspent: Mutex<u32>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            txs: Mutex::new(HashMap::new()),
            blocks: Mutex::new(BTreeMap::new()),
            send_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            unspent: Mutex::new(Vec::new()),
            confirmations: Mutex::new(HashMap::new()),
            wallet_history: Mutex::new(Vec::new()),
            mempool: Mutex::new(Vec::new()),
            fail_unspent: Mutex::new(0),
        }
    }

    fn block_hash_for(height: u64) -> String {
        format!("{:064x}", height + 0xb10c)
    }

    /// Insert a transaction whose first input carries `asm` in its
    /// scriptSig, optionally spending `(prev_txid, vout)`, optionally
    /// confirmed at `height`.
    pub fn add_envelope_tx(
        &self,
        txid: &str,
        asm: &str,
        spends: Option<(&str, u32)>,
        height: Option<u64>,
    ) {
        let tx = VerboseTransaction {
            txid: txid.to_string(),
            vin: vec![Vin {
                txid: spends.map(|(t, _)| t.to_string()),
                vout: spends.map(|(_, v)| v),
                coinbase: None,
                script_sig: Some(ScriptSig {
                    asm: asm.to_string(),
                    hex: String::new(),
                }),
            }],
            vout: vec![Vout {
                value: 0.001,
                n: 0,
                script_pub_key: crate::rpc::ScriptPubKey {
                    hex: "76a914".to_string(),
                    addresses: None,
                },
            }],
            blockhash: height.map(Self::block_hash_for),
            confirmations: height.map(|_| 1),
        };
        self.txs.lock().unwrap().insert(txid.to_string(), tx);
    }

    /// Insert a bare transaction with the given input references and
    /// output count (for ancestor-walk tests).
    pub fn add_plain_tx(
        &self,
        txid: &str,
        inputs: &[(&str, u32)],
        outputs: usize,
        height: Option<u64>,
        coinbase: bool,
    ) {
        let vin = if coinbase {
            vec![Vin {
                txid: None,
                vout: None,
                coinbase: Some("04ffff".to_string()),
                script_sig: None,
            }]
        } else {
            inputs
                .iter()
                .map(|(t, v)| Vin {
                    txid: Some(t.to_string()),
                    vout: Some(*v),
                    coinbase: None,
                    script_sig: Some(ScriptSig {
                        asm: "3044aa 02bb".to_string(),
                        hex: String::new(),
                    }),
                })
                .collect()
        };
        let tx = VerboseTransaction {
            txid: txid.to_string(),
            vin,
            vout: (0..outputs)
                .map(|n| Vout {
                    value: 0.001,
                    n: n as u32,
                    script_pub_key: crate::rpc::ScriptPubKey {
                        hex: "76a914".to_string(),
                        addresses: None,
                    },
                })
                .collect(),
            blockhash: height.map(Self::block_hash_for),
            confirmations: height.map(|_| 1),
        };
        self.txs.lock().unwrap().insert(txid.to_string(), tx);
    }

    /// Rewrite an existing transaction's first input reference.
    pub fn set_vin(&self, txid: &str, prev_txid: &str, vout: u32) {
        let mut txs = self.txs.lock().unwrap();
        if let Some(tx) = txs.get_mut(txid) {
            if let Some(vin) = tx.vin.first_mut() {
                vin.txid = Some(prev_txid.to_string());
                vin.vout = Some(vout);
            }
        }
    }

    pub fn add_block(&self, height: u64, txids: &[&str]) {
        self.blocks
            .lock()
            .unwrap()
            .insert(height, txids.iter().map(|t| t.to_string()).collect());
    }

    pub fn script_send(&self, outcome: SendScript) {
        self.send_script.lock().unwrap().push_back(outcome);
    }

    pub fn set_confirmations(&self, txid: &str, confs: i64) {
        self.confirmations
            .lock()
            .unwrap()
            .insert(txid.to_string(), confs);
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainRpc for MockChain {
    async fn get_raw_transaction_verbose(&self, txid: &str) -> Result<VerboseTransaction> {
        self.txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::Rpc(format!("No such mempool or blockchain transaction: {}", txid)))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        if self.blocks.lock().unwrap().contains_key(&height) {
            Ok(Self::block_hash_for(height))
        } else {
            Err(Error::Rpc("Block height out of range".to_string()))
        }
    }

    async fn get_block_verbose(&self, hash: &str) -> Result<VerboseBlock> {
        let blocks = self.blocks.lock().unwrap();
        let txs = self.txs.lock().unwrap();
        for (height, txids) in blocks.iter() {
            if Self::block_hash_for(*height) == hash {
                return Ok(VerboseBlock {
                    hash: hash.to_string(),
                    height: *height,
                    tx: txids.iter().filter_map(|t| txs.get(t).cloned()).collect(),
                });
            }
        }
        Err(Error::Rpc("Block not found".to_string()))
    }

    async fn get_block_count(&self) -> Result<u64> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String> {
        let script = self.send_script.lock().unwrap().pop_front();
        match script {
            Some(SendScript::Reject(msg)) => Err(Error::Rpc(msg)),
            _ => {
                self.sent.lock().unwrap().push(hex.to_string());
                Ok(crate::tx::txid_from_raw_hex(hex)
                    .unwrap_or_else(|_| format!("{:064x}", self.sent.lock().unwrap().len())))
            }
        }
    }

    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>> {
        {
            let mut failures = self.fail_unspent.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Rpc("connection refused".to_string()));
            }
        }
        let unspent = self.unspent.lock().unwrap();
        Ok(unspent
            .iter()
            .filter(|u| {
                addresses.is_empty()
                    || u.address
                        .as_ref()
                        .map(|a| addresses.contains(a))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction> {
        self.confirmations
            .lock()
            .unwrap()
            .get(txid)
            .map(|confs| WalletTransaction {
                txid: txid.to_string(),
                confirmations: *confs,
            })
            .ok_or_else(|| Error::Rpc("Invalid or non-wallet transaction id".to_string()))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<String>> {
        Ok(self.mempool.lock().unwrap().clone())
    }

    async fn list_transactions(&self, count: u32, skip: u32) -> Result<Vec<ListTransactionsEntry>> {
        let rows = self.wallet_history.lock().unwrap();
        Ok(rows
            .iter()
            .skip(skip as usize)
            .take(count as usize)
            .cloned()
            .collect())
    }
}

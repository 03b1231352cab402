/// Wallet state
///
/// A funding wallet is one WIF private key, its derived P2PKH address and
/// an unordered UTXO set, persisted as `.wallet.json` in the wallet
/// directory. The builder/broadcaster own this file exclusively; every
/// produced transaction removes its spends and appends its change before
/// the file is rewritten. `(txid, vout)` keys are unique and duplicates
/// are dropped on load.

use rand::RngCore;
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::rpc::UnspentOutput;
use crate::script::{self, Network};

pub const WALLET_FILE: &str = ".wallet.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// scriptPubKey hex
    pub script: String,
    pub satoshis: u64,
}

impl Utxo {
    pub fn key(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }
}

#[derive(Serialize, Deserialize)]
struct WalletFileBody {
    privkey: String,
    address: String,
    utxos: Vec<Utxo>,
}

pub struct Wallet {
    secret: SecretKey,
    pub pubkey: Vec<u8>,
    pub address: String,
    pub utxos: Vec<Utxo>,
    path: PathBuf,
    pub network: Network,
}

pub fn wif_encode(secret: &SecretKey, network: Network) -> String {
    let mut payload = secret.secret_bytes().to_vec();
    payload.push(0x01); // compressed pubkey flag
    script::base58check_encode(network.wif_prefix(), &payload)
}

pub fn wif_decode(wif: &str, network: Network) -> Result<SecretKey> {
    let (version, payload) = script::base58check_decode(wif)?;
    if version != network.wif_prefix() {
        return Err(Error::Wallet(format!(
            "WIF version {} does not match network",
            version
        )));
    }
    let key_bytes = match payload.len() {
        33 if payload[32] == 0x01 => &payload[..32],
        32 => &payload[..],
        n => return Err(Error::Wallet(format!("WIF payload is {} bytes", n))),
    };
    SecretKey::from_slice(key_bytes).map_err(Error::from)
}

fn derive(secret: &SecretKey, network: Network) -> (Vec<u8>, String) {
    let pubkey = PublicKey::from_secret_key(SECP256K1, secret)
        .serialize()
        .to_vec();
    let address = script::p2pkh_address(&pubkey, network);
    (pubkey, address)
}

fn dedupe(utxos: Vec<Utxo>) -> Vec<Utxo> {
    let mut seen = HashSet::new();
    utxos
        .into_iter()
        .filter(|u| seen.insert(u.key()))
        .collect()
}

impl Wallet {
    /// Generate a fresh key and write the wallet file.
    pub fn create(dir: &Path, network: Network) -> Result<Self> {
        let mut bytes = [0u8; 32];
        let secret = loop {
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            if let Ok(key) = SecretKey::from_slice(&bytes) {
                break key;
            }
        };
        let (pubkey, address) = derive(&secret, network);
        let wallet = Self {
            secret,
            pubkey,
            address,
            utxos: Vec::new(),
            path: dir.join(WALLET_FILE),
            network,
        };
        wallet.save()?;
        info!(address = %wallet.address, "created wallet");
        Ok(wallet)
    }

    pub fn load(dir: &Path, network: Network) -> Result<Self> {
        let path = dir.join(WALLET_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::Wallet(format!("cannot read {}: {}", path.display(), e)))?;
        let body: WalletFileBody = serde_json::from_str(&raw)?;
        let secret = wif_decode(&body.privkey, network)?;
        let (pubkey, address) = derive(&secret, network);
        Ok(Self {
            secret,
            pubkey,
            address,
            utxos: dedupe(body.utxos),
            path,
            network,
        })
    }

    pub fn save(&self) -> Result<()> {
        let body = WalletFileBody {
            privkey: wif_encode(&self.secret, self.network),
            address: self.address.clone(),
            utxos: self.utxos.clone(),
        };
        let json = serde_json::to_vec_pretty(&body)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn balance(&self) -> u64 {
        self.utxos.iter().map(|u| u.satoshis).sum()
    }

    /// Replace the UTXO view from a `listunspent` response.
    pub fn sync_unspent(&mut self, unspent: &[UnspentOutput]) {
        self.utxos = dedupe(
            unspent
                .iter()
                .map(|u| Utxo {
                    txid: u.txid.clone(),
                    vout: u.vout,
                    script: u.script_pub_key.clone(),
                    satoshis: u.satoshis(),
                })
                .collect(),
        );
    }

    pub fn remove_spent(&mut self, spent: &[(String, u32)]) {
        self.utxos.retain(|u| !spent.contains(&u.key()));
    }

    pub fn add_utxo(&mut self, utxo: Utxo) {
        if !self.utxos.iter().any(|u| u.key() == utxo.key()) {
            self.utxos.push(utxo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wif_roundtrip() {
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let wif = wif_encode(&secret, Network::Mainnet);
        let decoded = wif_decode(&wif, Network::Mainnet).unwrap();
        assert_eq!(secret, decoded);
        // wrong network is rejected
        assert!(wif_decode(&wif, Network::Testnet).is_err());
    }

    #[test]
    fn test_create_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let created = Wallet::create(dir.path(), Network::Mainnet).unwrap();
        assert!(created.address.starts_with('D'));

        let loaded = Wallet::load(dir.path(), Network::Mainnet).unwrap();
        assert_eq!(loaded.address, created.address);
        assert_eq!(loaded.pubkey, created.pubkey);
        assert_eq!(loaded.balance(), 0);
    }

    #[test]
    fn test_duplicate_utxos_dropped_on_load() {
        let dir = TempDir::new().unwrap();
        let mut wallet = Wallet::create(dir.path(), Network::Mainnet).unwrap();
        let utxo = Utxo {
            txid: "aa".repeat(32),
            vout: 0,
            script: "76a914".to_string(),
            satoshis: 5_000,
        };
        wallet.utxos.push(utxo.clone());
        wallet.utxos.push(utxo.clone());
        wallet.save().unwrap();

        let loaded = Wallet::load(dir.path(), Network::Mainnet).unwrap();
        assert_eq!(loaded.utxos.len(), 1);
        assert_eq!(loaded.balance(), 5_000);
    }

    #[test]
    fn test_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let mut wallet = Wallet::create(dir.path(), Network::Mainnet).unwrap();
        let a = Utxo {
            txid: "aa".repeat(32),
            vout: 0,
            script: "76a914".to_string(),
            satoshis: 7_000,
        };
        let b = Utxo {
            txid: "bb".repeat(32),
            vout: 1,
            script: "76a914".to_string(),
            satoshis: 3_000,
        };
        wallet.add_utxo(a.clone());
        wallet.add_utxo(b.clone());
        wallet.add_utxo(b.clone());
        assert_eq!(wallet.balance(), 10_000);

        wallet.remove_spent(&[a.key()]);
        assert_eq!(wallet.utxos, vec![b]);
    }
}

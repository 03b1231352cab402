/// Broadcaster + Pending Journal
///
/// A built chain must land in order, reveal last. Any failure other than
/// the idempotent "already spent/mined" responses journals the unsent
/// residue (the failing transaction and everything after it) next to the
/// wallet file; the next process start rebroadcasts the journal before
/// doing anything else. That gives at-least-once delivery with an
/// idempotent resume.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{classify_send_error, is_already_spent, Error, Result};
use crate::rpc::ChainRpc;
use crate::tx::txid_from_raw_hex;

pub const PENDING_FILE: &str = "pending-txs.json";

pub fn pending_path(wallet_dir: &Path) -> PathBuf {
    wallet_dir.join(PENDING_FILE)
}

pub fn read_pending(wallet_dir: &Path) -> Result<Option<Vec<String>>> {
    let path = pending_path(wallet_dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn write_pending(wallet_dir: &Path, hexes: &[String]) -> Result<()> {
    let path = pending_path(wallet_dir);
    let body = serde_json::to_vec_pretty(hexes)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &body)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

pub fn clear_pending(wallet_dir: &Path) -> Result<()> {
    let path = pending_path(wallet_dir);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}

pub struct Broadcaster<'a, R: ChainRpc> {
    rpc: &'a R,
    wallet_dir: PathBuf,
}

impl<'a, R: ChainRpc> Broadcaster<'a, R> {
    pub fn new(rpc: &'a R, wallet_dir: impl Into<PathBuf>) -> Self {
        Self {
            rpc,
            wallet_dir: wallet_dir.into(),
        }
    }

    /// Broadcast `hexes` in order. With `retry_chain_limit` the
    /// mempool-chain rejection backs off one second and resends;
    /// without, it journals the residue and surfaces like any other
    /// failure so the bulk controller can run its recovery.
    pub async fn broadcast_chain(
        &self,
        hexes: &[String],
        retry_chain_limit: bool,
    ) -> Result<Vec<String>> {
        let mut txids = Vec::with_capacity(hexes.len());

        for (i, raw) in hexes.iter().enumerate() {
            loop {
                match self.rpc.send_raw_transaction(raw).await {
                    Ok(txid) => {
                        txids.push(txid);
                        break;
                    }
                    Err(Error::Rpc(msg)) => {
                        if is_already_spent(&msg) {
                            // Could be our own earlier send or a stale
                            // utxo view; keep the node's words on record.
                            warn!(response = %msg, "inputs already spent, treating as accepted");
                            txids.push(txid_from_raw_hex(raw)?);
                            break;
                        }
                        match classify_send_error(&msg) {
                            Error::MempoolChainLimit(m) if retry_chain_limit => {
                                warn!(response = %m, "mempool chain limit, retrying in 1s");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue;
                            }
                            e => {
                                write_pending(&self.wallet_dir, &hexes[i..])?;
                                warn!(
                                    journaled = hexes.len() - i,
                                    error = %e,
                                    "broadcast failed, journaled unsent residue"
                                );
                                return Err(e);
                            }
                        }
                    }
                    Err(e) => {
                        write_pending(&self.wallet_dir, &hexes[i..])?;
                        return Err(e);
                    }
                }
            }
        }

        clear_pending(&self.wallet_dir)?;
        Ok(txids)
    }

    /// Rebroadcast a pending journal left by an earlier run. Returns the
    /// number of transactions resent, or None when no journal exists.
    pub async fn resume_pending(&self) -> Result<Option<usize>> {
        let hexes = match read_pending(&self.wallet_dir)? {
            Some(h) => h,
            None => return Ok(None),
        };
        info!(txs = hexes.len(), "resuming pending transaction journal");
        let txids = self.broadcast_chain(&hexes, true).await?;
        info!(txs = txids.len(), "pending journal drained");
        Ok(Some(txids.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockChain, SendScript};
    use tempfile::TempDir;

    fn hexes(n: usize) -> Vec<String> {
        // minimal valid tx encodings are unnecessary; the mock hashes raw hex
        (0..n).map(|i| format!("0{}00", i)).collect()
    }

    #[tokio::test]
    async fn test_ordered_broadcast_and_clean_journal() {
        let chain = MockChain::new();
        let dir = TempDir::new().unwrap();
        let b = Broadcaster::new(&chain, dir.path());

        let batch = hexes(3);
        let txids = b.broadcast_chain(&batch, false).await.unwrap();
        assert_eq!(txids.len(), 3);
        assert_eq!(*chain.sent.lock().unwrap(), batch);
        assert!(read_pending(dir.path()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_already_spent_is_accepted() {
        let chain = MockChain::new();
        chain.script_send(SendScript::Reject("18: bad-txns-inputs-spent".to_string()));
        let dir = TempDir::new().unwrap();
        let b = Broadcaster::new(&chain, dir.path());

        let batch = hexes(2);
        let txids = b.broadcast_chain(&batch, false).await.unwrap();
        assert_eq!(txids.len(), 2);
        // first send was rejected but counted; second actually went out
        assert_eq!(chain.sent.lock().unwrap().len(), 1);
        assert!(read_pending(dir.path()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_limit_retries_when_enabled() {
        let chain = MockChain::new();
        chain.script_send(SendScript::Reject("66: too-long-mempool-chain".to_string()));
        let dir = TempDir::new().unwrap();
        let b = Broadcaster::new(&chain, dir.path());

        let batch = hexes(1);
        let txids = b.broadcast_chain(&batch, true).await.unwrap();
        assert_eq!(txids.len(), 1);
        assert_eq!(chain.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chain_limit_without_retry_journals_and_raises() {
        let chain = MockChain::new();
        chain.script_send(SendScript::Accept);
        chain.script_send(SendScript::Reject("66: too-long-mempool-chain".to_string()));
        let dir = TempDir::new().unwrap();
        let b = Broadcaster::new(&chain, dir.path());

        let batch = hexes(3);
        let err = b.broadcast_chain(&batch, false).await.unwrap_err();
        assert!(matches!(err, Error::MempoolChainLimit(_)));

        // the failing tx and everything after it were journaled
        let pending = read_pending(dir.path()).unwrap().unwrap();
        assert_eq!(pending, batch[1..].to_vec());
    }

    #[tokio::test]
    async fn test_other_error_journals_residue() {
        let chain = MockChain::new();
        chain.script_send(SendScript::Reject("-25: missing inputs".to_string()));
        let dir = TempDir::new().unwrap();
        let b = Broadcaster::new(&chain, dir.path());

        let batch = hexes(2);
        let err = b.broadcast_chain(&batch, false).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(_)));
        let pending = read_pending(dir.path()).unwrap().unwrap();
        assert_eq!(pending, batch);
    }

    #[tokio::test]
    async fn test_resume_pending_drains_and_removes_journal() {
        let chain = MockChain::new();
        let dir = TempDir::new().unwrap();
        let batch = hexes(2);
        write_pending(dir.path(), &batch).unwrap();

        let b = Broadcaster::new(&chain, dir.path());
        let resent = b.resume_pending().await.unwrap();
        assert_eq!(resent, Some(2));
        assert_eq!(*chain.sent.lock().unwrap(), batch);
        assert!(read_pending(dir.path()).unwrap().is_none());

        // nothing pending on the next start
        assert_eq!(b.resume_pending().await.unwrap(), None);
    }
}

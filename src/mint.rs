/// Bulk Mint Controller
///
/// Issues inscriptions in waves of at most 12 so one wallet never builds
/// an unconfirmed ancestor chain the mempool refuses. Normal cycle:
/// WAVE -> WAIT_CONFIRM -> SYNC -> WAVE. A chain-limit rejection inside a
/// wave switches to the recovery branch:
/// WAVE -> DELETE_PENDING -> SYNC -> TEST_WAVE -> (WAIT_CONFIRM | WAVE).
/// The confirmation target is wallet-scoped and picked once per wait;
/// mints on the same wallet are serialized through that wait, which is
/// what keeps the UTXO bookkeeping sound.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::broadcast::{self, Broadcaster};
use crate::builder;
use crate::drc20;
use crate::error::{Error, Result};
use crate::rpc::ChainRpc;
use crate::wallet::Wallet;

pub const WAVE_SIZE: usize = 12;
const CONFIRM_POLL: Duration = Duration::from_secs(30);
const SYNC_RETRIES: u32 = 5;
const SYNC_BACKOFF: Duration = Duration::from_secs(30);
const ANCESTOR_WALK_CAP: usize = 100;
const HISTORY_WINDOW: u32 = 50;

/// One payload to inscribe.
#[derive(Debug, Clone)]
pub struct MintItem {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResult {
    pub file: String,
    pub inscription_id: String,
    /// "normal", or "mempool-recovery" when the item went through the
    /// chain-limit recovery branch.
    pub mode: String,
    pub txid: String,
}

/// Per-run record, written incrementally (write-to-temp + rename).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub label: String,
    pub recipient: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_balance: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_balance: Option<u64>,
    pub total_files: usize,
    pub completed: usize,
    pub results: Vec<MintResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    fn new(label: &str, recipient: &str, total_files: usize, start_balance: Option<u64>) -> Self {
        Self {
            label: label.to_string(),
            recipient: recipient.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: "running".to_string(),
            start_balance,
            end_balance: None,
            total_files,
            completed: 0,
            results: Vec::new(),
            error: None,
        }
    }
}

fn write_record(path: &Path, record: &RunRecord) -> Result<()> {
    let body = serde_json::to_vec_pretty(record)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

enum State {
    Wave { test: bool },
    DeletePending,
    WaitConfirm,
    Sync { then_test: bool },
}

enum WaveEnd {
    /// No items left.
    Finished,
    /// Full wave done, more items remain.
    MoreRemain,
    /// The node refused a send for ancestor-chain length.
    ChainLimit,
}

pub struct MintController<'a, R: ChainRpc> {
    rpc: &'a R,
    wallet_dir: PathBuf,
    json_dir: PathBuf,
    fee_per_kb: u64,
    wave_size: usize,
    confirm_poll: Duration,
    sync_backoff: Duration,
}

impl<'a, R: ChainRpc> MintController<'a, R> {
    pub fn new(
        rpc: &'a R,
        wallet_dir: impl Into<PathBuf>,
        json_dir: impl Into<PathBuf>,
        fee_per_kb: u64,
    ) -> Self {
        Self {
            rpc,
            wallet_dir: wallet_dir.into(),
            json_dir: json_dir.into(),
            fee_per_kb,
            wave_size: WAVE_SIZE,
            confirm_poll: CONFIRM_POLL,
            sync_backoff: SYNC_BACKOFF,
        }
    }

    pub fn with_wave_size(mut self, wave_size: usize) -> Self {
        self.wave_size = wave_size.min(WAVE_SIZE);
        self
    }

    /// Inscribe `items` to `destination`, recording progress into
    /// `json/inscriptions_<label>_<iso>.json`.
    pub async fn run_files(
        &self,
        wallet: &mut Wallet,
        destination: &str,
        items: Vec<MintItem>,
        label: &str,
    ) -> Result<RunRecord> {
        fs::create_dir_all(&self.json_dir)?;
        let mut record = RunRecord::new(label, destination, items.len(), Some(wallet.balance()));
        let path = self.json_dir.join(format!(
            "inscriptions_{}_{}.json",
            label,
            record.started_at.format("%Y-%m-%dT%H-%M-%SZ")
        ));
        write_record(&path, &record)?;

        let outcome = self
            .mint_items(wallet, destination, items, label, &mut record, Some(&path))
            .await;
        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                record.status = "done".to_string();
                record.end_balance = Some(wallet.balance());
                write_record(&path, &record)?;
                Ok(record)
            }
            Err(e) => {
                record.status = "error".to_string();
                record.error = Some(e.to_string());
                write_record(&path, &record)?;
                Err(e)
            }
        }
    }

    /// Issue `count` DRC-20 mints per recipient, sequentially. Progress
    /// is reported against the grand total across all recipients.
    pub async fn run_drc20(
        &self,
        wallet: &mut Wallet,
        tick: &str,
        amt: u64,
        recipients: &[(String, u32)],
        label: &str,
    ) -> Result<Vec<String>> {
        let grand_total: u32 = recipients.iter().map(|(_, count)| count).sum();
        let mut txids = Vec::new();

        for (address, count) in recipients {
            let mut items = Vec::with_capacity(*count as usize);
            for i in 0..*count {
                items.push(MintItem {
                    name: format!("{}-{}", tick, i),
                    content_type: drc20::CONTENT_TYPE.to_string(),
                    data: drc20::mint_payload(tick, amt)?,
                });
            }
            let mut record = RunRecord::new(label, address, items.len(), None);
            self.mint_items(wallet, address, items, label, &mut record, None)
                .await?;
            txids.extend(record.results.into_iter().map(|r| r.txid));
            info!(completed = txids.len(), grand_total, "bulk mint progress");
        }

        Ok(txids)
    }

    /// The wave state machine shared by both run flavors. Results land in
    /// `record`; when `path` is set the record is rewritten after every
    /// completed item.
    async fn mint_items(
        &self,
        wallet: &mut Wallet,
        destination: &str,
        items: Vec<MintItem>,
        label: &str,
        record: &mut RunRecord,
        path: Option<&Path>,
    ) -> Result<()> {
        let mut queue: VecDeque<MintItem> = items.into();
        let mut recovering = false;
        let mut state = State::Wave { test: false };

        loop {
            match state {
                State::Wave { test } => {
                    let end = self
                        .run_wave(wallet, destination, &mut queue, &mut recovering, record, path)
                        .await?;
                    state = match end {
                        WaveEnd::Finished => break,
                        WaveEnd::MoreRemain => State::WaitConfirm,
                        WaveEnd::ChainLimit => {
                            recovering = true;
                            if test {
                                // Second strike: fall back to waiting on
                                // the wallet tip. The fresh residue goes
                                // the same way as the first.
                                broadcast::clear_pending(&self.wallet_dir)?;
                                State::WaitConfirm
                            } else {
                                State::DeletePending
                            }
                        }
                    };
                }
                State::DeletePending => {
                    broadcast::clear_pending(&self.wallet_dir)?;
                    state = State::Sync { then_test: true };
                }
                State::WaitConfirm => {
                    self.wait_for_confirmation(wallet, label).await?;
                    state = State::Sync { then_test: false };
                }
                State::Sync { then_test } => {
                    self.sync_wallet(wallet).await?;
                    if recovering && path.is_some() {
                        self.try_claim_recovered(&mut queue, &mut recovering, record, path)
                            .await;
                    }
                    state = State::Wave { test: then_test };
                }
            }
        }

        Ok(())
    }

    async fn run_wave(
        &self,
        wallet: &mut Wallet,
        destination: &str,
        queue: &mut VecDeque<MintItem>,
        recovering: &mut bool,
        record: &mut RunRecord,
        path: Option<&Path>,
    ) -> Result<WaveEnd> {
        let mut minted = 0;
        while minted < self.wave_size {
            let item = match queue.pop_front() {
                Some(item) => item,
                None => return Ok(WaveEnd::Finished),
            };

            match self.mint_one(wallet, destination, &item).await {
                Ok(txid) => {
                    let mode = if *recovering { "mempool-recovery" } else { "normal" };
                    *recovering = false;
                    record.results.push(MintResult {
                        file: item.name,
                        inscription_id: format!("{}i0", txid),
                        mode: mode.to_string(),
                        txid,
                    });
                    record.completed = record.results.len();
                    if let Some(p) = path {
                        write_record(p, record)?;
                    }
                    info!(
                        completed = record.completed,
                        total = record.total_files,
                        "minted inscription"
                    );
                    minted += 1;
                }
                Err(Error::MempoolChainLimit(msg)) => {
                    warn!(response = %msg, successes = minted, "wave hit mempool chain limit");
                    queue.push_front(item);
                    return Ok(WaveEnd::ChainLimit);
                }
                Err(e) => return Err(e),
            }
        }

        if queue.is_empty() {
            Ok(WaveEnd::Finished)
        } else {
            Ok(WaveEnd::MoreRemain)
        }
    }

    async fn mint_one(
        &self,
        wallet: &mut Wallet,
        destination: &str,
        item: &MintItem,
    ) -> Result<String> {
        let chain = builder::inscribe(
            wallet,
            destination,
            &item.content_type,
            &item.data,
            self.fee_per_kb,
        )?;
        let broadcaster = Broadcaster::new(self.rpc, &self.wallet_dir);
        broadcaster.broadcast_chain(&chain.to_hexes()?, false).await?;
        chain.inscription_txid()
    }

    /// After a chain-limit recovery the interrupted item may in fact have
    /// landed (its sends raced the rejection). If the on-chain reveal can
    /// be resolved, claim the queued item with it instead of re-minting.
    async fn try_claim_recovered(
        &self,
        queue: &mut VecDeque<MintItem>,
        recovering: &mut bool,
        record: &mut RunRecord,
        path: Option<&Path>,
    ) {
        let found = match resolve_recovered_reveal(self.rpc).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "reveal resolution failed, will re-mint");
                return;
            }
        };
        let Some(txid) = found else { return };
        if record.results.iter().any(|r| r.txid == txid) {
            return;
        }
        let Some(item) = queue.pop_front() else { return };
        info!(txid = %txid, file = %item.name, "recovered reveal from wallet history");
        record.results.push(MintResult {
            file: item.name,
            inscription_id: format!("{}i0", txid),
            mode: "mempool-recovery".to_string(),
            txid,
        });
        record.completed = record.results.len();
        *recovering = false;
        if let Some(p) = path {
            if let Err(e) = write_record(p, record) {
                warn!(error = %e, "failed to persist run record");
            }
        }
    }

    /// Pick the wallet's newest unconfirmed outgoing transaction once,
    /// then poll it every 30 seconds until it has a confirmation. The
    /// target is never re-selected mid-wait.
    async fn wait_for_confirmation(&self, wallet: &Wallet, label: &str) -> Result<()> {
        let target = match self.select_wallet_tip(wallet, label).await? {
            Some(txid) => txid,
            None => return Ok(()),
        };
        info!(txid = %crate::telemetry::txid_field(&target), "waiting for confirmation");
        loop {
            match self.rpc.get_transaction(&target).await {
                Ok(tx) if tx.confirmations >= 1 => {
                    info!(txid = %crate::telemetry::txid_field(&target), "confirmed");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "confirmation poll failed"),
            }
            tokio::time::sleep(self.confirm_poll).await;
        }
    }

    /// Wallet-scoped tip selection from `listtransactions`: unconfirmed
    /// sends attributed to this wallet by address (label as fallback),
    /// newest entry wins.
    async fn select_wallet_tip(&self, wallet: &Wallet, label: &str) -> Result<Option<String>> {
        let rows = self.rpc.list_transactions(HISTORY_WINDOW, 0).await?;
        let mut target = None;
        for row in &rows {
            if row.confirmations != 0 || row.category != "send" {
                continue;
            }
            let ours = row.address.as_deref() == Some(wallet.address.as_str())
                || row.label.as_deref() == Some(label);
            if ours {
                target = Some(row.txid.clone());
            }
        }
        Ok(target)
    }

    /// Refresh the wallet UTXO view from the node, retrying up to 5
    /// times with 30-second backoff before aborting the job.
    async fn sync_wallet(&self, wallet: &mut Wallet) -> Result<()> {
        let mut last_err: Option<Error> = None;
        for attempt in 1..=SYNC_RETRIES {
            match self
                .rpc
                .list_unspent(std::slice::from_ref(&wallet.address))
                .await
            {
                Ok(unspent) => {
                    wallet.sync_unspent(&unspent);
                    wallet.save()?;
                    info!(utxos = wallet.utxos.len(), balance = wallet.balance(), "wallet synced");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "wallet sync failed");
                    last_err = Some(e);
                    if attempt < SYNC_RETRIES {
                        tokio::time::sleep(self.sync_backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Rpc("wallet sync failed".to_string())))
    }
}

/// Resolve the reveal txid of an inscription whose mint was interrupted
/// by chain-limit: walk input history from the wallet's newest known
/// transaction to the genesis-looking ancestor (exactly one input, two
/// outputs, not coinbase), then find the recent wallet transaction whose
/// inputs reference that ancestor.
pub async fn resolve_recovered_reveal<R: ChainRpc>(rpc: &R) -> Result<Option<String>> {
    let rows = rpc.list_transactions(HISTORY_WINDOW, 0).await?;
    let start = match rows.iter().rev().find(|r| r.category == "send") {
        Some(row) => row.txid.clone(),
        None => return Ok(None),
    };

    let mut current = start;
    let mut ancestor = None;
    for _ in 0..ANCESTOR_WALK_CAP {
        let tx = match rpc.get_raw_transaction_verbose(&current).await {
            Ok(tx) => tx,
            Err(_) => return Ok(None),
        };
        if tx.vin.len() == 1 && tx.vout.len() == 2 && !tx.is_coinbase() {
            ancestor = Some(tx.txid);
            break;
        }
        match tx.vin.first().and_then(|v| v.txid.clone()) {
            Some(prev) => current = prev,
            None => return Ok(None),
        }
    }
    let Some(ancestor) = ancestor else {
        return Ok(None);
    };

    for row in rows.iter().rev() {
        let tx = match rpc.get_raw_transaction_verbose(&row.txid).await {
            Ok(tx) => tx,
            Err(_) => continue,
        };
        if tx.txid != ancestor
            && tx
                .vin
                .iter()
                .any(|v| v.txid.as_deref() == Some(ancestor.as_str()))
        {
            return Ok(Some(row.txid.clone()));
        }
    }
    Ok(None)
}

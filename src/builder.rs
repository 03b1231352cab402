/// Inscription Builder
///
/// Fragments a payload into script chunks and plans the commit+reveal
/// transaction chain. Each partial envelope is committed behind a P2SH
/// output; the transaction after it reveals the partial in its scriptSig,
/// and the final reveal pays the inscription value to the destination.
/// The wallet file is rewritten after every produced transaction so an
/// interrupted build never double-spends its own selection.

use secp256k1::{Message, SECP256K1};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::script;
use crate::tx::{Transaction, TxInput, TxOutput, SIGHASH_ALL};
use crate::wallet::{Utxo, Wallet};

/// Consensus cap on a single pushed script element.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Payload bytes per envelope chunk.
pub const MAX_CHUNK_LEN: usize = 240;
/// Serialized size cap for one partial envelope.
pub const MAX_PAYLOAD_LEN: usize = 1500;
/// Value carried through the P2SH chain and paid by the reveal.
pub const REVEAL_VALUE: u64 = 100_000;
/// Base units per kB of serialized transaction.
pub const DEFAULT_FEE_PER_KB: u64 = 100_000_000;

/// Estimated scriptSig size for a signed P2PKH spend.
const P2PKH_SCRIPTSIG_LEN: usize = 107;
/// DER signature + sighash byte, upper bound.
const SIG_PUSH_LEN: usize = 73;

/// An ordered commit/reveal chain, ready to broadcast.
#[derive(Debug)]
pub struct BuiltChain {
    pub txs: Vec<Transaction>,
}

impl BuiltChain {
    /// The inscription's identity: the transaction whose input carries
    /// the envelope sentinel. With more than one transaction that is the
    /// second (the first spend of a commit), otherwise the first.
    pub fn inscription_txid(&self) -> Result<String> {
        match self.txs.len() {
            0 => Err(Error::InvalidInput("empty chain".to_string())),
            1 => self.txs[0].txid(),
            _ => self.txs[1].txid(),
        }
    }

    pub fn reveal_txid(&self) -> Result<String> {
        self.txs
            .last()
            .ok_or_else(|| Error::InvalidInput("empty chain".to_string()))?
            .txid()
    }

    pub fn to_hexes(&self) -> Result<Vec<String>> {
        self.txs.iter().map(|t| t.to_hex()).collect()
    }
}

fn push_encoded_len(data_len: usize) -> usize {
    let overhead = if data_len == 0 {
        return 1; // OP_0
    } else if data_len < script::OP_PUSHDATA1 as usize {
        1
    } else if data_len <= 0xff {
        2
    } else if data_len <= 0xffff {
        3
    } else {
        5
    };
    overhead + data_len
}

fn partial_serialized_len(elements: &[Vec<u8>]) -> usize {
    elements.iter().map(|e| push_encoded_len(e.len())).sum()
}

fn serialize_partial(elements: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for element in elements {
        script::push_data(&mut out, element);
    }
    out
}

/// Flatten the envelope into pushable elements:
/// `"ord" <numParts> <contentType> (<partsRemainingAfterThis> <part>)*`.
fn envelope_elements(content_type: &str, parts: &[&[u8]]) -> VecDeque<Vec<u8>> {
    let mut elements = VecDeque::new();
    elements.push_back(b"ord".to_vec());
    elements.push_back(script::script_num_encode(parts.len() as i64));
    elements.push_back(content_type.as_bytes().to_vec());
    for (i, part) in parts.iter().enumerate() {
        elements.push_back(script::script_num_encode((parts.len() - i - 1) as i64));
        elements.push_back(part.to_vec());
    }
    elements
}

/// Greedy packing of elements into partial envelopes of at most
/// `MAX_PAYLOAD_LEN` serialized bytes; when a pair overshoots, the last
/// two pushes are reverted back onto the source.
fn pack_partials(mut elements: VecDeque<Vec<u8>>) -> Vec<Vec<Vec<u8>>> {
    let mut partials = Vec::new();
    let mut first = true;
    while !elements.is_empty() {
        let mut partial: Vec<Vec<u8>> = Vec::new();
        if first {
            // The sentinel rides alone so every two-element move below is
            // a (marker, chunk) pair and continuation partials start on a
            // marker boundary.
            partial.push(elements.pop_front().unwrap());
            first = false;
        }
        while partial_serialized_len(&partial) <= MAX_PAYLOAD_LEN && !elements.is_empty() {
            partial.push(elements.pop_front().unwrap());
            if let Some(next) = elements.pop_front() {
                partial.push(next);
            }
        }
        if partial_serialized_len(&partial) > MAX_PAYLOAD_LEN && partial.len() > 2 {
            let chunk = partial.pop().unwrap();
            let marker = partial.pop().unwrap();
            elements.push_front(chunk);
            elements.push_front(marker);
        }
        partials.push(partial);
    }
    partials
}

/// The previous transaction's P2SH commitment, spent by the next hop.
struct PrevCommit {
    txid: String,
    lock: Vec<u8>,
    partial: Vec<Vec<u8>>,
}

struct Funding {
    selected: Vec<Utxo>,
    change: Option<(u32, u64)>,
}

fn estimate_fee(
    tx: &Transaction,
    prev: Option<&PrevCommit>,
    wallet_inputs: usize,
    fee_per_kb: u64,
) -> Result<u64> {
    let mut size = tx.size()?;
    // unsigned scriptSigs get their eventual sizes added
    size += wallet_inputs * P2PKH_SCRIPTSIG_LEN;
    if let Some(p) = prev {
        size += partial_serialized_len(&p.partial)
            + push_encoded_len(SIG_PUSH_LEN - 1)
            + push_encoded_len(p.lock.len());
    }
    // change output: value + varint + p2pkh script
    size += 8 + 1 + 25;
    Ok(((size as u64) * fee_per_kb + 999) / 1000)
}

/// Greedy UTXO selection: add wallet inputs until outputs + fee are
/// covered, then append the change output.
fn fund(
    wallet: &Wallet,
    tx: &mut Transaction,
    prev: Option<&PrevCommit>,
    fee_per_kb: u64,
) -> Result<Funding> {
    let out_sum: u64 = tx.outputs.iter().map(|o| o.value).sum();
    let mut total_in: u64 = if prev.is_some() { REVEAL_VALUE } else { 0 };
    let mut selected: Vec<Utxo> = Vec::new();

    let fee = loop {
        let fee = estimate_fee(tx, prev, selected.len(), fee_per_kb)?;
        if total_in >= out_sum + fee {
            break fee;
        }
        match wallet.utxos.get(selected.len()) {
            Some(utxo) => {
                tx.inputs.push(TxInput::new(&utxo.txid, utxo.vout));
                total_in += utxo.satoshis;
                selected.push(utxo.clone());
            }
            None => {
                return Err(Error::InsufficientFunds {
                    required: out_sum + fee,
                    available: total_in,
                });
            }
        }
    };

    let change_value = total_in - out_sum - fee;
    let change = if change_value > 0 {
        let script = script::p2pkh_script(&script::hash160(&wallet.pubkey));
        tx.outputs.push(TxOutput {
            value: change_value,
            script_pubkey: script,
        });
        Some(((tx.outputs.len() - 1) as u32, change_value))
    } else {
        None
    };

    Ok(Funding { selected, change })
}

fn sign_ecdsa(wallet: &Wallet, sighash: &[u8]) -> Result<Vec<u8>> {
    let message = Message::from_slice(sighash)?;
    let mut sig = SECP256K1
        .sign_ecdsa(&message, wallet.secret_key())
        .serialize_der()
        .to_vec();
    sig.push(SIGHASH_ALL as u8);
    Ok(sig)
}

fn sign_inputs(
    wallet: &Wallet,
    tx: &mut Transaction,
    prev: Option<&PrevCommit>,
    funding: &Funding,
) -> Result<()> {
    let wallet_input_offset = if prev.is_some() { 1 } else { 0 };

    if let Some(p) = prev {
        let sighash = tx.signature_hash(0, &p.lock)?;
        let sig = sign_ecdsa(wallet, &sighash)?;
        let mut unlock = serialize_partial(&p.partial);
        script::push_data(&mut unlock, &sig);
        script::push_data(&mut unlock, &p.lock);
        tx.inputs[0].script_sig = unlock;
    }

    for (i, utxo) in funding.selected.iter().enumerate() {
        let subscript = hex::decode(&utxo.script)?;
        let sighash = tx.signature_hash(wallet_input_offset + i, &subscript)?;
        let sig = sign_ecdsa(wallet, &sighash)?;
        let mut script_sig = Vec::new();
        script::push_data(&mut script_sig, &sig);
        script::push_data(&mut script_sig, &wallet.pubkey);
        tx.inputs[wallet_input_offset + i].script_sig = script_sig;
    }

    Ok(())
}

fn apply_bookkeeping(
    wallet: &mut Wallet,
    txid: &str,
    tx: &Transaction,
    funding: &Funding,
) -> Result<()> {
    let spent: Vec<(String, u32)> = funding.selected.iter().map(|u| u.key()).collect();
    wallet.remove_spent(&spent);
    if let Some((vout, value)) = funding.change {
        wallet.add_utxo(Utxo {
            txid: txid.to_string(),
            vout,
            script: hex::encode(&tx.outputs[vout as usize].script_pubkey),
            satoshis: value,
        });
    }
    wallet.save()
}

/// Build the full commit+reveal chain for one inscription.
pub fn inscribe(
    wallet: &mut Wallet,
    destination: &str,
    content_type: &str,
    data: &[u8],
    fee_per_kb: u64,
) -> Result<BuiltChain> {
    if content_type.len() > MAX_SCRIPT_ELEMENT_SIZE {
        return Err(Error::InvalidInput(format!(
            "content type is {} bytes, max {}",
            content_type.len(),
            MAX_SCRIPT_ELEMENT_SIZE
        )));
    }
    if data.is_empty() {
        return Err(Error::InvalidInput("empty payload".to_string()));
    }
    let destination_script = script::address_to_script(destination, wallet.network)?;

    let parts: Vec<&[u8]> = data.chunks(MAX_CHUNK_LEN).collect();
    let partials = pack_partials(envelope_elements(content_type, &parts));
    debug!(
        parts = parts.len(),
        partials = partials.len(),
        bytes = data.len(),
        "packed inscription envelope"
    );

    let mut txs: Vec<Transaction> = Vec::new();
    let mut prev: Option<PrevCommit> = None;

    for partial in partials {
        let lock = script::build_lock_script(&wallet.pubkey, partial.len());
        let p2sh = script::p2sh_script(&script::hash160(&lock));

        let mut tx = Transaction::new();
        if let Some(ref p) = prev {
            tx.inputs.push(TxInput::new(&p.txid, 0));
        }
        tx.outputs.push(TxOutput {
            value: REVEAL_VALUE,
            script_pubkey: p2sh,
        });

        let funding = fund(wallet, &mut tx, prev.as_ref(), fee_per_kb)?;
        sign_inputs(wallet, &mut tx, prev.as_ref(), &funding)?;
        let txid = tx.txid()?;
        apply_bookkeeping(wallet, &txid, &tx, &funding)?;

        prev = Some(PrevCommit {
            txid,
            lock,
            partial,
        });
        txs.push(tx);
    }

    // The reveal spends the last commitment and pays the destination.
    let last = prev.ok_or_else(|| Error::InvalidInput("empty envelope".to_string()))?;
    let mut reveal = Transaction::new();
    reveal.inputs.push(TxInput::new(&last.txid, 0));
    reveal.outputs.push(TxOutput {
        value: REVEAL_VALUE,
        script_pubkey: destination_script,
    });
    let funding = fund(wallet, &mut reveal, Some(&last), fee_per_kb)?;
    sign_inputs(wallet, &mut reveal, Some(&last), &funding)?;
    let reveal_txid = reveal.txid()?;
    apply_bookkeeping(wallet, &reveal_txid, &reveal, &funding)?;
    txs.push(reveal);

    let chain = BuiltChain { txs };
    info!(
        txs = chain.txs.len(),
        inscription = %chain.inscription_txid()?,
        "built inscription chain"
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope;
    use crate::script::{to_asm, Network};
    use tempfile::TempDir;

    fn funded_wallet(satoshis: u64) -> (Wallet, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut wallet = Wallet::create(dir.path(), Network::Mainnet).unwrap();
        wallet.add_utxo(Utxo {
            txid: "11".repeat(32),
            vout: 0,
            script: hex::encode(script::p2pkh_script(&script::hash160(&wallet.pubkey))),
            satoshis,
        });
        wallet.save().unwrap();
        (wallet, dir)
    }

    fn dest() -> String {
        script::base58check_encode(30, &[0x77; 20])
    }

    #[test]
    fn test_small_payload_builds_commit_and_reveal() {
        let (mut wallet, _dir) = funded_wallet(10_000_000);
        let chain = inscribe(&mut wallet, &dest(), "text/plain", b"Hello shibes", 1_000).unwrap();

        assert_eq!(chain.txs.len(), 2);
        // commit carries the P2SH commitment at vout 0 with the reveal value
        let commit = &chain.txs[0];
        assert_eq!(commit.outputs[0].value, REVEAL_VALUE);
        assert_eq!(commit.outputs[0].script_pubkey[0], script::OP_HASH160);
        // reveal spends it
        let reveal = &chain.txs[1];
        assert_eq!(reveal.inputs[0].prevout.txid, commit.txid().unwrap());
        assert_eq!(reveal.inputs[0].prevout.vout, 0);
        assert_eq!(reveal.outputs[0].value, REVEAL_VALUE);
        // identity is the sentinel-bearing second transaction
        assert_eq!(
            chain.inscription_txid().unwrap(),
            reveal.txid().unwrap()
        );
    }

    #[test]
    fn test_envelope_roundtrip_through_parser() {
        let (mut wallet, _dir) = funded_wallet(100_000_000);
        let payload = (0u8..=255).cycle().take(700).collect::<Vec<u8>>();
        let chain = inscribe(&mut wallet, &dest(), "application/octet-stream", &payload, 1_000).unwrap();

        // reassemble the payload from the reveal-side scriptSigs exactly
        // the way the chain walker does
        let mut hex_acc = String::new();
        let mut mime = None;
        for (i, tx) in chain.txs.iter().enumerate().skip(1) {
            let asm = to_asm(&tx.inputs[0].script_sig).unwrap();
            let tokens = envelope::tokenize(&asm);
            let parsed = if i == 1 {
                envelope::parse_genesis(&tokens).unwrap()
            } else {
                envelope::parse_subsequent(&tokens).unwrap()
            };
            if mime.is_none() {
                mime = parsed.mime.clone();
            }
            hex_acc.push_str(&parsed.hex);
            if parsed.end_of_data {
                break;
            }
        }

        assert_eq!(mime.as_deref(), Some("application/octet-stream"));
        assert_eq!(hex::decode(&hex_acc).unwrap(), payload);
    }

    #[test]
    fn test_large_payload_spans_multiple_partials() {
        let (mut wallet, _dir) = funded_wallet(1_000_000_000);
        let payload = vec![0xabu8; 4_000];
        let chain = inscribe(&mut wallet, &dest(), "image/png", &payload, 1_000).unwrap();
        assert!(chain.txs.len() > 2, "got {} txs", chain.txs.len());

        // every intermediate commit spends its predecessor's vout 0
        for pair in chain.txs.windows(2) {
            assert_eq!(pair[1].inputs[0].prevout.txid, pair[0].txid().unwrap());
            assert_eq!(pair[1].inputs[0].prevout.vout, 0);
        }
        // identity stays on the second transaction even for long chains
        assert_eq!(
            chain.inscription_txid().unwrap(),
            chain.txs[1].txid().unwrap()
        );
    }

    #[test]
    fn test_partial_packing_respects_payload_cap() {
        let payload = vec![0x5au8; 10_000];
        let parts: Vec<&[u8]> = payload.chunks(MAX_CHUNK_LEN).collect();
        let partials = pack_partials(envelope_elements("text/plain", &parts));

        assert!(partials.len() > 1);
        for partial in &partials {
            assert!(partial_serialized_len(partial) <= MAX_PAYLOAD_LEN);
        }
        // nothing was lost in packing
        let total: usize = partials.iter().map(|p| p.len()).sum();
        assert_eq!(total, 3 + parts.len() * 2);

        // the sentinel leads the first partial and every continuation
        // starts on a (marker, chunk) boundary
        assert_eq!(partials[0][0], b"ord".to_vec());
        assert_eq!(partials[0].len() % 2, 1);
        for partial in &partials[1..] {
            assert!(partial[0].len() <= 2, "continuation must open with a marker");
            assert_eq!(partial.len() % 2, 0);
        }
    }

    #[test]
    fn test_insufficient_funds() {
        let (mut wallet, _dir) = funded_wallet(10_000);
        let err = inscribe(&mut wallet, &dest(), "text/plain", b"too rich for me", 1_000).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
    }

    #[test]
    fn test_oversized_content_type_rejected() {
        let (mut wallet, _dir) = funded_wallet(10_000_000);
        let huge = "x".repeat(MAX_SCRIPT_ELEMENT_SIZE + 1);
        assert!(matches!(
            inscribe(&mut wallet, &dest(), &huge, b"data", 1_000),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wallet_bookkeeping_after_build() {
        let (mut wallet, dir) = funded_wallet(10_000_000);
        let before = wallet.balance();
        let chain = inscribe(&mut wallet, &dest(), "text/plain", b"bookkeeping", 1_000).unwrap();

        // the original utxo is gone and change came back
        assert!(!wallet.utxos.iter().any(|u| u.txid == "11".repeat(32)));
        assert!(wallet.balance() < before);
        assert!(wallet.balance() > 0);
        let reveal_txid = chain.txs.last().unwrap().txid().unwrap();
        assert!(wallet.utxos.iter().any(|u| u.txid == reveal_txid));

        // the wallet file on disk reflects the final state
        let reloaded = Wallet::load(dir.path(), Network::Mainnet).unwrap();
        assert_eq!(reloaded.balance(), wallet.balance());
    }

    #[test]
    fn test_lock_script_drop_count_matches_partial() {
        let parts: Vec<&[u8]> = vec![b"abcdef"];
        let elements = envelope_elements("text/plain", &parts);
        let partials = pack_partials(elements);
        assert_eq!(partials.len(), 1);
        // ord, numParts, contentType, marker, chunk
        assert_eq!(partials[0].len(), 5);
    }
}

/// Transaction model and serialization
///
/// Hand-rolled legacy (pre-segwit) transaction encoding: Dogecoin
/// inscriptions never touch witness data. Txids are displayed big-endian
/// (reversed sha256d of the serialized bytes), prevout references are
/// stored display-style and reversed on the wire.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::script::sha256d;

pub const SIGHASH_ALL: u32 = 1;

#[derive(Debug, Clone)]
pub struct OutPoint {
    /// Display-order (big-endian) txid hex.
    pub txid: String,
    pub vout: u32,
}

#[derive(Debug, Clone)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(txid: &str, vout: u32) -> Self {
        Self {
            prevout: OutPoint {
                txid: txid.to_string(),
                vout,
            },
            script_sig: Vec::new(),
            sequence: 0xffff_ffff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.write_u16::<LittleEndian>(n as u16).unwrap();
        }
        0x10000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.write_u32::<LittleEndian>(n as u32).unwrap();
        }
        _ => {
            buf.push(0xff);
            buf.write_u64::<LittleEndian>(n).unwrap();
        }
    }
}

fn write_txid_wire(buf: &mut Vec<u8>, txid: &str) -> Result<()> {
    let mut bytes = hex::decode(txid)?;
    if bytes.len() != 32 {
        return Err(Error::InvalidInput(format!("txid is {} bytes", bytes.len())));
    }
    bytes.reverse();
    buf.extend_from_slice(&bytes);
    Ok(())
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(self.version).unwrap();

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            write_txid_wire(&mut buf, &input.prevout.txid)?;
            buf.write_u32::<LittleEndian>(input.prevout.vout).unwrap();
            write_varint(&mut buf, input.script_sig.len() as u64);
            buf.extend_from_slice(&input.script_sig);
            buf.write_u32::<LittleEndian>(input.sequence).unwrap();
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.write_u64::<LittleEndian>(output.value).unwrap();
            write_varint(&mut buf, output.script_pubkey.len() as u64);
            buf.extend_from_slice(&output.script_pubkey);
        }

        buf.write_u32::<LittleEndian>(self.lock_time).unwrap();
        Ok(buf)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.serialize()?))
    }

    pub fn txid(&self) -> Result<String> {
        let mut hash = sha256d(&self.serialize()?);
        hash.reverse();
        Ok(hex::encode(hash))
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.serialize()?.len())
    }

    /// Legacy SIGHASH_ALL digest for `input_index`: every scriptSig is
    /// blanked, the signed input carries `subscript`, and the sighash
    /// type is appended before double-hashing.
    pub fn signature_hash(&self, input_index: usize, subscript: &[u8]) -> Result<Vec<u8>> {
        if input_index >= self.inputs.len() {
            return Err(Error::InvalidInput(format!(
                "signature input {} out of range",
                input_index
            )));
        }
        let mut copy = self.clone();
        for (i, input) in copy.inputs.iter_mut().enumerate() {
            input.script_sig = if i == input_index {
                subscript.to_vec()
            } else {
                Vec::new()
            };
        }
        let mut buf = copy.serialize()?;
        buf.write_u32::<LittleEndian>(SIGHASH_ALL).unwrap();
        Ok(sha256d(&buf))
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Txid of an already-serialized transaction hex.
pub fn txid_from_raw_hex(raw: &str) -> Result<String> {
    let bytes = hex::decode(raw)?;
    let mut hash = sha256d(&bytes);
    hash.reverse();
    Ok(hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;

    fn sample_tx() -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(&"ab".repeat(32), 1));
        tx.outputs.push(TxOutput {
            value: 100_000,
            script_pubkey: script::p2pkh_script(&[0x55; 20]),
        });
        tx
    }

    #[test]
    fn test_serialize_layout() {
        let tx = sample_tx();
        let raw = tx.serialize().unwrap();
        // version
        assert_eq!(&raw[0..4], &1i32.to_le_bytes());
        // one input, txid reversed on the wire
        assert_eq!(raw[4], 1);
        assert_eq!(&raw[5..37], &[0xab; 32]);
        assert_eq!(&raw[37..41], &1u32.to_le_bytes());
        // empty scriptSig, default sequence
        assert_eq!(raw[41], 0);
        assert_eq!(&raw[42..46], &[0xff; 4]);
        // one output of 100_000
        assert_eq!(raw[46], 1);
        assert_eq!(&raw[47..55], &100_000u64.to_le_bytes());
    }

    #[test]
    fn test_txid_matches_raw_hex_helper() {
        let tx = sample_tx();
        assert_eq!(
            tx.txid().unwrap(),
            txid_from_raw_hex(&tx.to_hex().unwrap()).unwrap()
        );
    }

    #[test]
    fn test_signature_hash_isolates_input() {
        let mut tx = sample_tx();
        tx.inputs.push(TxInput::new(&"cd".repeat(32), 0));
        let sub = script::p2pkh_script(&[0x66; 20]);

        let h0 = tx.signature_hash(0, &sub).unwrap();
        let h1 = tx.signature_hash(1, &sub).unwrap();
        assert_ne!(h0, h1);

        // scriptSigs present on the tx do not leak into the digest
        tx.inputs[1].script_sig = vec![0xde, 0xad];
        assert_eq!(tx.signature_hash(0, &sub).unwrap(), h0);
    }

    #[test]
    fn test_signature_hash_bad_index() {
        let tx = sample_tx();
        assert!(tx.signature_hash(5, &[]).is_err());
    }

    #[test]
    fn test_varint_thresholds() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0xfc);
        assert_eq!(buf, vec![0xfc]);
        buf.clear();
        write_varint(&mut buf, 0xfd);
        assert_eq!(buf, vec![0xfd, 0xfd, 0x00]);
        buf.clear();
        write_varint(&mut buf, 0x10000);
        assert_eq!(buf, vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }
}

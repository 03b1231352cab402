/// Script primitives
///
/// Minimal script construction for the inscription protocol: data pushes,
/// script-number encoding, the P2PKH/P2SH templates, hash160 and
/// base58check addressing with Dogecoin version bytes. Only what the
/// builder emits; this is not a script interpreter.

use ripemd160::{Digest as RipemdDigest, Ripemd160};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_DROP: u8 = 0x75;
pub const OP_TRUE: u8 = 0x51;
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;

/// Dogecoin base58 version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn pubkey_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 30,
            Network::Testnet => 113,
        }
    }

    pub fn script_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 22,
            Network::Testnet => 196,
        }
    }

    pub fn wif_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 158,
            Network::Testnet => 241,
        }
    }
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

pub fn sha256d(data: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(data);
    Sha256::digest(&first).to_vec()
}

pub fn hash160(data: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(data);
    Ripemd160::digest(&sha).to_vec()
}

/// Append a data push with minimal opcode encoding.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        script.push(OP_0);
        return;
    }
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Minimal script-number encoding (little-endian sign-magnitude).
pub fn script_num_encode(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}

fn script_num_decode(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        let byte = if i == bytes.len() - 1 { b & 0x7f } else { *b };
        value |= (byte as i64) << (8 * i);
    }
    if bytes.last().unwrap() & 0x80 != 0 {
        -value
    } else {
        value
    }
}

/// Append a number as a minimal data push.
pub fn push_num(script: &mut Vec<u8>, n: i64) {
    let encoded = script_num_encode(n);
    push_data(script, &encoded);
}

/// `OP_DUP OP_HASH160 <hash20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(pubkey_hash: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_DUP, OP_HASH160];
    push_data(&mut script, pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// `OP_HASH160 <hash20> OP_EQUAL`
pub fn p2sh_script(script_hash: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_HASH160];
    push_data(&mut script, script_hash);
    script.push(OP_EQUAL);
    script
}

/// Redeem script committing to one partial envelope:
/// `<pubkey> OP_CHECKSIGVERIFY (OP_DROP){n} OP_TRUE`.
pub fn build_lock_script(pubkey: &[u8], num_drops: usize) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIGVERIFY);
    for _ in 0..num_drops {
        script.push(OP_DROP);
    }
    script.push(OP_TRUE);
    script
}

pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut extended = vec![version];
    extended.extend_from_slice(payload);
    let checksum = sha256d(&extended);
    extended.extend_from_slice(&checksum[0..4]);
    bs58::encode(extended).into_string()
}

pub fn base58check_decode(s: &str) -> Result<(u8, Vec<u8>)> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| Error::InvalidInput(format!("bad base58: {}", e)))?;
    if raw.len() < 5 {
        return Err(Error::InvalidInput("base58 payload too short".to_string()));
    }
    let (body, checksum) = raw.split_at(raw.len() - 4);
    if sha256d(body)[0..4] != *checksum {
        return Err(Error::InvalidInput("base58 checksum mismatch".to_string()));
    }
    Ok((body[0], body[1..].to_vec()))
}

pub fn p2pkh_address(pubkey: &[u8], network: Network) -> String {
    base58check_encode(network.pubkey_prefix(), &hash160(pubkey))
}

/// Build the scriptPubKey paying `address`, accepting both P2PKH and
/// P2SH encodings of the selected network.
pub fn address_to_script(address: &str, network: Network) -> Result<Vec<u8>> {
    let (version, payload) = base58check_decode(address)?;
    if payload.len() != 20 {
        return Err(Error::InvalidInput(format!(
            "address hash is {} bytes, expected 20",
            payload.len()
        )));
    }
    if version == network.pubkey_prefix() {
        Ok(p2pkh_script(&payload))
    } else if version == network.script_prefix() {
        Ok(p2sh_script(&payload))
    } else {
        Err(Error::InvalidInput(format!(
            "address version {} does not match network",
            version
        )))
    }
}

/// Render a push-only script the way the node's `asm` field does: pushes
/// of at most 4 bytes print as script numbers, larger ones as hex. This
/// is what the envelope parser tokenizes on the decode side.
pub fn to_asm(script: &[u8]) -> Result<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        let len = match op {
            OP_0 => {
                tokens.push("0".to_string());
                continue;
            }
            l if l < OP_PUSHDATA1 => l as usize,
            OP_PUSHDATA1 => {
                let l = *script
                    .get(i)
                    .ok_or_else(|| Error::InvalidInput("truncated pushdata1".to_string()))?
                    as usize;
                i += 1;
                l
            }
            OP_PUSHDATA2 => {
                let b = script
                    .get(i..i + 2)
                    .ok_or_else(|| Error::InvalidInput("truncated pushdata2".to_string()))?;
                i += 2;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let b = script
                    .get(i..i + 4)
                    .ok_or_else(|| Error::InvalidInput("truncated pushdata4".to_string()))?;
                i += 4;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            other => {
                // non-push opcode; scriptSigs we render are push-only
                return Err(Error::InvalidInput(format!("unexpected opcode {:#x}", other)));
            }
        };
        let data = script
            .get(i..i + len)
            .ok_or_else(|| Error::InvalidInput("truncated push data".to_string()))?;
        i += len;
        if len <= 4 {
            tokens.push(script_num_decode(data).to_string());
        } else {
            tokens.push(hex::encode(data));
        }
    }
    Ok(tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_num_roundtrip() {
        for n in [0i64, 1, 127, 128, 255, 256, 6_582_895, -1, -128] {
            let encoded = script_num_encode(n);
            assert_eq!(script_num_decode(&encoded), n, "n={}", n);
        }
        // "ord" little-endian is the envelope sentinel
        assert_eq!(script_num_encode(6_582_895), b"ord".to_vec());
    }

    #[test]
    fn test_push_encoding_thresholds() {
        let mut s = Vec::new();
        push_data(&mut s, &[0xaa; 75]);
        assert_eq!(s[0], 75);

        let mut s = Vec::new();
        push_data(&mut s, &[0xaa; 76]);
        assert_eq!(s[0], OP_PUSHDATA1);
        assert_eq!(s[1], 76);

        let mut s = Vec::new();
        push_data(&mut s, &[0xaa; 300]);
        assert_eq!(s[0], OP_PUSHDATA2);
    }

    #[test]
    fn test_lock_script_shape() {
        let pubkey = [0x02; 33];
        let lock = build_lock_script(&pubkey, 4);
        assert_eq!(lock[0], 33);
        assert_eq!(lock[34], OP_CHECKSIGVERIFY);
        assert_eq!(&lock[35..39], &[OP_DROP; 4]);
        assert_eq!(lock[39], OP_TRUE);
    }

    #[test]
    fn test_base58check_roundtrip() {
        let payload = [0x11u8; 20];
        let addr = base58check_encode(30, &payload);
        // Dogecoin mainnet P2PKH addresses start with 'D'
        assert!(addr.starts_with('D'));
        let (version, decoded) = base58check_decode(&addr).unwrap();
        assert_eq!(version, 30);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_base58check_rejects_corruption() {
        let addr = base58check_encode(30, &[0x11u8; 20]);
        let mut corrupted = addr.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'2' { b'3' } else { b'2' };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(base58check_decode(&corrupted).is_err());
    }

    #[test]
    fn test_address_to_script_templates() {
        let p2pkh_addr = base58check_encode(30, &[0x22u8; 20]);
        let script = address_to_script(&p2pkh_addr, Network::Mainnet).unwrap();
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script.len(), 25);

        let p2sh_addr = base58check_encode(22, &[0x33u8; 20]);
        let script = address_to_script(&p2sh_addr, Network::Mainnet).unwrap();
        assert_eq!(script[0], OP_HASH160);
        assert_eq!(script.len(), 23);

        assert!(address_to_script(&p2pkh_addr, Network::Testnet).is_err());
    }

    #[test]
    fn test_to_asm_renders_numbers_and_hex() {
        let mut script = Vec::new();
        push_num(&mut script, 6_582_895);
        push_num(&mut script, 0);
        push_data(&mut script, b"hello");
        assert_eq!(to_asm(&script).unwrap(), "6582895 0 68656c6c6f");
    }
}

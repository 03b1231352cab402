/// Envelope Parser
///
/// Inscription data rides in the scriptSig assembly of a transaction's
/// inputs as a whitespace-separated token stream. Decimal tokens are
/// integer markers, hex tokens carry payload bytes. A genesis input leads
/// with the sentinel `6582895` ("ord" read as a little-endian script
/// number), then the remaining-chunks marker and the hex-encoded mime
/// type, then `(remaining, chunk)` pairs. A remaining value of 0 ends the
/// envelope. Subsequent inputs carry pairs only.
///
/// Reveal inputs end with a signature and the serialized lock script;
/// both are hex, so pair consumption stops at the first token that is not
/// a decimal integer.

use crate::error::{Error, Result};

/// "ord" interpreted as a little-endian script number.
pub const SENTINEL: i64 = 6_582_895;

/// Outcome of parsing one input's assembly.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    /// Accumulated payload hex, concatenated in stream order.
    pub hex: String,
    /// UTF-8 decoded mime type (genesis inputs only).
    pub mime: Option<String>,
    /// A remaining marker of 0 was seen: the envelope is complete.
    pub end_of_data: bool,
    /// Number of `(marker, chunk)` pairs consumed.
    pub chunks: u64,
    /// Last remaining-chunks marker seen; added to `chunks` this gives the
    /// walker's running total estimate.
    pub last_remaining: u64,
    /// A marker had no usable chunk behind it. The caller keeps whatever
    /// hex was collected and surfaces a warning.
    pub truncated: bool,
}

pub fn tokenize(asm: &str) -> Vec<&str> {
    asm.split_whitespace().collect()
}

fn parse_int(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').or_else(|| token.strip_prefix('+')).unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<i64>().ok()
}

// Odd-length runs are accepted: the decode layer pads them (see the
// materializer's padding rule) rather than losing the chunk here.
fn is_hex_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Does this input assembly open with the genesis sentinel?
pub fn starts_with_sentinel(tokens: &[&str]) -> bool {
    tokens.first().and_then(|t| parse_int(t)) == Some(SENTINEL)
}

/// Parse a genesis input: `[sentinel, remainingChunks, mimeHex, pairs...]`.
pub fn parse_genesis(tokens: &[&str]) -> Result<Parsed> {
    if tokens.len() < 3 {
        return Err(Error::InvalidInput(format!(
            "genesis envelope needs at least 3 tokens, got {}",
            tokens.len()
        )));
    }
    if !starts_with_sentinel(tokens) {
        return Err(Error::NotDoginal(tokens[0].to_string()));
    }

    let remaining = parse_int(tokens[1]).ok_or_else(|| {
        Error::InvalidInput(format!("expected remaining-chunks marker, got {:?}", tokens[1]))
    })?;

    let mime_bytes = hex::decode(tokens[2])
        .map_err(|_| Error::InvalidInput(format!("mime type is not hex: {:?}", tokens[2])))?;
    let mime = String::from_utf8(mime_bytes)
        .map_err(|_| Error::InvalidInput("mime type is not utf-8".to_string()))?;

    let mut parsed = consume_pairs(&tokens[3..]);
    parsed.mime = Some(mime);
    if parsed.chunks == 0 && !parsed.end_of_data {
        parsed.last_remaining = remaining.max(0) as u64;
    }
    Ok(parsed)
}

/// Parse a subsequent (non-genesis) input: pairs only.
pub fn parse_subsequent(tokens: &[&str]) -> Result<Parsed> {
    Ok(consume_pairs(tokens))
}

/// Greedily consume `(marker, chunk)` pairs. Stops cleanly at the first
/// non-integer token (the signature/lock tail of a reveal input), at
/// exhaustion, or after the pair whose marker is 0.
fn consume_pairs(tokens: &[&str]) -> Parsed {
    let mut parsed = Parsed::default();
    let mut i = 0;

    while i < tokens.len() {
        let marker = match parse_int(tokens[i]) {
            Some(m) => m,
            None => break,
        };
        i += 1;

        let chunk = match tokens.get(i) {
            Some(t) if is_hex_token(t) => t,
            _ => {
                // Marker with no chunk behind it. A 0 marker at the very
                // end is a clean terminator, anything else is truncation.
                if marker == 0 {
                    parsed.end_of_data = true;
                } else {
                    parsed.truncated = true;
                }
                return parsed;
            }
        };
        i += 1;

        parsed.hex.push_str(chunk);
        parsed.chunks += 1;
        parsed.last_remaining = marker.max(0) as u64;

        if marker == 0 {
            parsed.end_of_data = true;
            break;
        }
    }

    parsed
}

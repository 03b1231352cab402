/// DRC-20 payloads
///
/// The bulk controller mints DRC-20 tokens by inscribing the canonical
/// JSON operation as `text/plain;charset=utf-8`.

use crate::error::{Error, Result};

pub const CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// `{"p":"drc-20","op":"mint","tick":...,"amt":...}`
pub fn mint_payload(tick: &str, amt: u64) -> Result<Vec<u8>> {
    if tick.is_empty() || tick.len() > 4 {
        return Err(Error::InvalidInput(format!("bad drc-20 tick {:?}", tick)));
    }
    let body = serde_json::json!({
        "p": "drc-20",
        "op": "mint",
        "tick": tick.to_ascii_lowercase(),
        "amt": amt.to_string(),
    });
    Ok(serde_json::to_vec(&body)?)
}

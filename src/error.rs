use std::fmt;

/// Unified error type for decode, build and broadcast paths.
///
/// Broadcast-side callers match on `MempoolChainLimit` to drive the
/// wait/retry recovery, so node error strings are classified once, here.
#[derive(Debug)]
pub enum Error {
    /// Malformed inscription id, oversized content type, non-hex payload.
    InvalidInput(String),
    /// First input assembly lacks the envelope sentinel.
    NotDoginal(String),
    /// Walker ran out of hops (or reached the tip) before end-of-data.
    Truncated(String),
    /// Node or transport failure.
    Rpc(String),
    /// Wallet cannot satisfy outputs + fee.
    InsufficientFunds { required: u64, available: u64 },
    /// Node refused the tx because the unconfirmed ancestor chain is too long.
    MempoolChainLimit(String),
    /// Wallet state problems (bad WIF, missing file, corrupt utxo set).
    Wallet(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::NotDoginal(txid) => write!(f, "not a doginal: {}", txid),
            Error::Truncated(msg) => write!(f, "truncated inscription: {}", msg),
            Error::Rpc(msg) => write!(f, "rpc error: {}", msg),
            Error::InsufficientFunds { required, available } => write!(
                f,
                "insufficient funds: required {} satoshis, available {}",
                required, available
            ),
            Error::MempoolChainLimit(msg) => write!(f, "mempool chain limit: {}", msg),
            Error::Wallet(msg) => write!(f, "wallet error: {}", msg),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidInput(format!("bad hex: {}", e))
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Error::Wallet(format!("secp256k1: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classify a `sendrawtransaction` rejection by the node's error string.
pub fn classify_send_error(msg: &str) -> Error {
    if msg.contains("too-long-mempool-chain") {
        Error::MempoolChainLimit(msg.to_string())
    } else {
        Error::Rpc(msg.to_string())
    }
}

/// The node already knows these inputs are gone: a prior broadcast of the
/// same tx (or of its double-spend) landed. Treated as accepted.
pub fn is_already_spent(msg: &str) -> bool {
    msg.contains("bad-txns-inputs-spent") || msg.contains("already in block chain")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_chain_limit() {
        let err = classify_send_error("66: too-long-mempool-chain");
        assert!(matches!(err, Error::MempoolChainLimit(_)));
    }

    #[test]
    fn test_classify_other_is_rpc() {
        let err = classify_send_error("-25: missing inputs");
        assert!(matches!(err, Error::Rpc(_)));
    }

    #[test]
    fn test_already_spent_variants() {
        assert!(is_already_spent("18: bad-txns-inputs-spent"));
        assert!(is_already_spent("transaction already in block chain"));
        assert!(!is_already_spent("66: too-long-mempool-chain"));
    }
}

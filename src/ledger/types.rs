use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const UNDERPRICED_MARKERS: [&str; 2] = ["transaction underpriced", "replacement transaction underpriced"];

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger configuration: {0}")]
    Config(String),
    #[error("rpc transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transaction underpriced: {0}")]
    Underpriced(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("transaction {tx_hash} not mined within {waited:?}")]
    MinedTimeout { tx_hash: TxHash, waited: Duration },
    #[error("transaction {tx_hash} reverted in block {block}")]
    Reverted { tx_hash: TxHash, block: u64 },
    #[error("unexpected rpc payload: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Classifies a JSON-RPC error object. Fee rejections become
    /// `Underpriced` so the committer can tell them apart.
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if UNDERPRICED_MARKERS.iter().any(|m| lower.contains(m)) {
            LedgerError::Underpriced(message)
        } else {
            LedgerError::Rpc { code, message }
        }
    }

    pub fn is_underpriced(&self) -> bool {
        matches!(self, LedgerError::Underpriced(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn decode_fixed<const N: usize>(s: &str, what: &str) -> LedgerResult<[u8; N]> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    let bytes = hex::decode(digits).map_err(|e| LedgerError::Config(format!("invalid {}: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| LedgerError::Config(format!("{} must be {} bytes, got {}", what, N, b.len())))
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        decode_fixed::<20>(s, "address").map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl FromStr for TxHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        decode_fixed::<32>(s, "transaction hash").map(TxHash)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The parts of a mined transaction's receipt this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underpriced_classification() {
        assert!(LedgerError::from_rpc(-32000, "transaction underpriced").is_underpriced());
        assert!(LedgerError::from_rpc(-32000, "replacement transaction underpriced").is_underpriced());
        assert!(LedgerError::from_rpc(-32000, "Transaction Underpriced: fee too low").is_underpriced());
        assert!(!LedgerError::from_rpc(-32000, "nonce too low").is_underpriced());
        assert!(!LedgerError::from_rpc(-32000, "insufficient funds for gas * price + value").is_underpriced());
    }

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "0x130548c20002412015b9dE28aE8Ed1Daa2874ea2".parse().unwrap();
        assert_eq!(addr.to_string(), "0x130548c20002412015b9de28ae8ed1daa2874ea2");
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-hex".parse::<Address>().is_err());
    }
}

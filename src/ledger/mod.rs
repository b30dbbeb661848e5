pub mod types;
pub use types::*;
pub mod abi;
pub mod committer;
pub mod rlp;
pub mod rpc;
pub mod signer;

use async_trait::async_trait;

use crate::batch::types::LedgerCommitRecord;

/// The node operations the committer needs. Implemented over JSON-RPC in
/// production and by in-memory chains in tests.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> LedgerResult<u64>;
    async fn pending_nonce(&self, account: &Address) -> LedgerResult<u64>;
    async fn gas_price(&self) -> LedgerResult<u128>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash>;
    /// `None` while the transaction is not yet mined.
    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>>;
}

/// Records a published batch on chain. Returns once the transaction is mined
/// with success status.
#[async_trait]
pub trait LedgerCommitter: Send + Sync {
    async fn commit(&self, record: &LedgerCommitRecord) -> LedgerResult<TxReceipt>;
}

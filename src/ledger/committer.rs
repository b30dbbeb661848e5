// Commits batch windows to the registry contract on an EVM chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use super::abi;
use super::signer::{LegacyTransaction, LocalSigner};
use super::{Address, ChainRpc, LedgerCommitter, LedgerError, LedgerResult, TxHash, TxReceipt};
use crate::batch::types::LedgerCommitRecord;
use crate::config::ChainSettings;

pub struct EvmCommitter {
    rpc: Arc<dyn ChainRpc>,
    settings: ChainSettings,
}

/// Suggested price plus `bump_percent`.
pub fn bumped_gas_price(suggested: u128, bump_percent: u64) -> u128 {
    suggested.saturating_mul(100 + bump_percent as u128) / 100
}

impl EvmCommitter {
    pub fn new(rpc: Arc<dyn ChainRpc>, settings: ChainSettings) -> Self {
        Self { rpc, settings }
    }

    fn signer(&self) -> LedgerResult<LocalSigner> {
        let key = self
            .settings
            .private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LedgerError::Config("signing key is not set".into()))?;
        LocalSigner::from_hex(key)
    }

    fn contract(&self) -> LedgerResult<Address> {
        self.settings
            .contract_address
            .as_deref()
            .ok_or_else(|| LedgerError::Config("contract address is not set".into()))?
            .parse()
    }

    /// Fresh nonce and gas price, sign, broadcast. One attempt.
    #[instrument(skip(self, signer, data))]
    async fn broadcast_once(
        &self,
        signer: &LocalSigner,
        contract: Address,
        data: &[u8],
        chain_id: u64,
        attempt: u32,
    ) -> LedgerResult<TxHash> {
        let nonce = self.rpc.pending_nonce(&signer.address()).await?;
        let suggested = self.rpc.gas_price().await?;
        let gas_price = bumped_gas_price(suggested, self.settings.gas_price_bump_percent);

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: self.settings.gas_limit,
            to: contract,
            value: 0,
            data: data.to_vec(),
        };
        let signed = signer.sign(&tx, chain_id)?;

        debug!(nonce, suggested = %suggested, gas_price = %gas_price, tx_hash = %signed.hash, "Broadcasting transaction");
        metrics::counter!("trade_anchor_broadcast_attempts_total").increment(1);
        let accepted = self.rpc.send_raw_transaction(&signed.raw).await?;
        if accepted != signed.hash {
            warn!(local = %signed.hash, node = %accepted, "Node reported a different transaction hash");
        }
        Ok(signed.hash)
    }

    async fn wait_mined(&self, tx_hash: TxHash) -> LedgerResult<TxReceipt> {
        let poll = self.settings.receipt_poll_interval();
        let waited = self.settings.mined_timeout();

        let wait = async {
            loop {
                match self.rpc.transaction_receipt(&tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Receipt lookup failed, still waiting"),
                }
                sleep(poll).await;
            }
        };

        timeout(waited, wait)
            .await
            .map_err(|_| LedgerError::MinedTimeout { tx_hash, waited })
    }

    /// One detached receipt lookup, logged and otherwise ignored.
    fn spawn_status_probe(&self, tx_hash: TxHash) {
        let rpc = Arc::clone(&self.rpc);
        let limit = self.settings.status_probe_timeout();
        tokio::spawn(async move { probe_status(rpc, tx_hash, limit).await });
    }
}

async fn probe_status(rpc: Arc<dyn ChainRpc>, tx_hash: TxHash, limit: Duration) {
    match timeout(limit, rpc.transaction_receipt(&tx_hash)).await {
        Ok(Ok(Some(receipt))) if receipt.success => {
            info!(tx_hash = %tx_hash, block = receipt.block_number, "Status probe: transaction successful")
        }
        Ok(Ok(Some(receipt))) => {
            warn!(tx_hash = %tx_hash, block = receipt.block_number, "Status probe: transaction failed")
        }
        Ok(Ok(None)) => debug!(tx_hash = %tx_hash, "Status probe: not mined yet"),
        Ok(Err(e)) => debug!(tx_hash = %tx_hash, error = %e, "Status probe: lookup failed"),
        Err(_) => debug!(tx_hash = %tx_hash, "Status probe: timed out"),
    }
}

#[async_trait]
impl LedgerCommitter for EvmCommitter {
    #[instrument(skip(self, record), fields(start = record.start_time, end = record.end_time, cid = %record.cid))]
    async fn commit(&self, record: &LedgerCommitRecord) -> LedgerResult<TxReceipt> {
        if record.start_time >= record.end_time {
            return Err(LedgerError::Config(format!(
                "empty window {}..{}",
                record.start_time, record.end_time
            )));
        }
        let signer = self.signer()?;
        let contract = self.contract()?;
        let data = abi::encode_commit_call(record.start_time, record.end_time, record.cid.as_str());
        let chain_id = match self.settings.chain_id {
            Some(id) => id,
            None => self.rpc.chain_id().await?,
        };

        let max_attempts = self.settings.max_broadcast_attempts.max(1);
        let mut attempt = 0;
        let tx_hash = loop {
            attempt += 1;
            match self.broadcast_once(&signer, contract, &data, chain_id, attempt).await {
                Ok(hash) => break hash,
                Err(e) if e.is_underpriced() && attempt < max_attempts => {
                    let backoff = self.settings.underpriced_backoff();
                    warn!(attempt, ?backoff, error = %e, "Transaction underpriced, retrying");
                    sleep(backoff).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Broadcast failed");
                    return Err(e);
                }
            }
        };

        info!(tx_hash = %tx_hash, attempt, "Batch commit broadcast");
        self.spawn_status_probe(tx_hash);

        let receipt = self.wait_mined(tx_hash).await?;
        if !receipt.success {
            return Err(LedgerError::Reverted { tx_hash, block: receipt.block_number });
        }
        info!(tx_hash = %tx_hash, block = receipt.block_number, "Batch commit mined");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::Cid;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const KEY: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";
    const CONTRACT: &str = "0x130548c20002412015b9dE28aE8Ed1Daa2874ea2";

    #[derive(Default)]
    struct ScriptedChain {
        send_results: Mutex<VecDeque<LedgerResult<()>>>,
        receipts: Mutex<VecDeque<Option<TxReceipt>>>,
        mined_status: Mutex<Option<bool>>,
        nonce_calls: Mutex<u32>,
        gas_calls: Mutex<u32>,
        sent: Mutex<Vec<Vec<u8>>>,
        chain_id_calls: Mutex<u32>,
        failing_lookups: Mutex<u32>,
        lookups: Mutex<u32>,
    }

    impl ScriptedChain {
        fn mined(success: bool) -> Self {
            let chain = Self::default();
            *chain.mined_status.lock() = Some(success);
            chain
        }
    }

    #[async_trait]
    impl ChainRpc for ScriptedChain {
        async fn chain_id(&self) -> LedgerResult<u64> {
            *self.chain_id_calls.lock() += 1;
            Ok(11_155_111)
        }

        async fn pending_nonce(&self, _account: &Address) -> LedgerResult<u64> {
            let mut calls = self.nonce_calls.lock();
            *calls += 1;
            Ok(40 + *calls as u64)
        }

        async fn gas_price(&self) -> LedgerResult<u128> {
            *self.gas_calls.lock() += 1;
            Ok(1_000)
        }

        async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash> {
            self.sent.lock().push(raw.to_vec());
            self.send_results.lock().pop_front().unwrap_or(Ok(()))?;
            Ok(TxHash(abi::keccak256(raw)))
        }

        async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>> {
            *self.lookups.lock() += 1;
            {
                let mut failing = self.failing_lookups.lock();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(LedgerError::Decode("receipt missing status".into()));
                }
            }
            if let Some(scripted) = self.receipts.lock().pop_front() {
                return Ok(scripted);
            }
            Ok(self.mined_status.lock().map(|success| TxReceipt {
                tx_hash: *hash,
                block_number: 99,
                success,
            }))
        }
    }

    fn settings() -> ChainSettings {
        ChainSettings {
            rpc_url: Some("http://unused".into()),
            private_key: Some(KEY.into()),
            contract_address: Some(CONTRACT.into()),
            chain_id: Some(11_155_111),
            ..ChainSettings::default()
        }
    }

    fn record() -> LedgerCommitRecord {
        LedgerCommitRecord { start_time: 100, end_time: 160, cid: Cid::new("Qm123").unwrap() }
    }

    #[test]
    fn test_gas_bump() {
        assert_eq!(bumped_gas_price(1_000, 10), 1_100);
        assert_eq!(bumped_gas_price(15, 10), 16);
        assert_eq!(bumped_gas_price(0, 10), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_success_single_attempt() {
        let chain = Arc::new(ScriptedChain::mined(true));
        let committer = EvmCommitter::new(chain.clone(), settings());

        let receipt = committer.commit(&record()).await.unwrap();
        assert!(receipt.success);
        assert_eq!(*chain.nonce_calls.lock(), 1);
        assert_eq!(*chain.gas_calls.lock(), 1);
        assert_eq!(*chain.chain_id_calls.lock(), 0);

        let sent = chain.sent.lock();
        assert_eq!(sent.len(), 1);
        let call = abi::encode_commit_call(100, 160, "Qm123");
        assert!(sent[0].windows(call.len()).any(|w| w == call.as_slice()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_underpriced_retries_once_after_backoff() {
        let chain = Arc::new(ScriptedChain::mined(true));
        chain
            .send_results
            .lock()
            .push_back(Err(LedgerError::from_rpc(-32000, "transaction underpriced")));
        let committer = EvmCommitter::new(chain.clone(), settings());

        let started = tokio::time::Instant::now();
        committer.commit(&record()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));

        assert_eq!(*chain.nonce_calls.lock(), 2);
        assert_eq!(*chain.gas_calls.lock(), 2);
        assert_eq!(chain.sent.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_underpriced_twice_gives_up() {
        let chain = Arc::new(ScriptedChain::mined(true));
        for _ in 0..3 {
            chain
                .send_results
                .lock()
                .push_back(Err(LedgerError::from_rpc(-32000, "replacement transaction underpriced")));
        }
        let committer = EvmCommitter::new(chain.clone(), settings());

        let err = committer.commit(&record()).await.unwrap_err();
        assert!(err.is_underpriced());
        assert_eq!(chain.sent.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_broadcast_errors_do_not_retry() {
        let chain = Arc::new(ScriptedChain::mined(true));
        chain
            .send_results
            .lock()
            .push_back(Err(LedgerError::from_rpc(-32000, "nonce too low")));
        let committer = EvmCommitter::new(chain.clone(), settings());

        let err = committer.commit(&record()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { .. }));
        assert_eq!(chain.sent.lock().len(), 1);
        assert_eq!(*chain.nonce_calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_is_distinct_error() {
        let chain = Arc::new(ScriptedChain::mined(false));
        let committer = EvmCommitter::new(chain.clone(), settings());

        let err = committer.commit(&record()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { block: 99, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_mined() {
        let chain = Arc::new(ScriptedChain::mined(true));
        {
            let mut receipts = chain.receipts.lock();
            // The status probe may take one of these; the wait loop polls past the rest.
            for _ in 0..5 {
                receipts.push_back(None);
            }
        }
        let committer = EvmCommitter::new(chain.clone(), settings());

        let receipt = committer.commit(&record()).await.unwrap();
        assert_eq!(receipt.block_number, 99);
        assert!(chain.receipts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_errors_keep_polling() {
        let chain = Arc::new(ScriptedChain::mined(true));
        *chain.failing_lookups.lock() = 3;
        let committer = EvmCommitter::new(chain.clone(), settings());

        let receipt = committer.commit(&record()).await.unwrap();
        assert!(receipt.success);
        assert_eq!(*chain.failing_lookups.lock(), 0);
        assert!(*chain.lookups.lock() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_errors_until_deadline_is_timeout() {
        let chain = Arc::new(ScriptedChain::mined(true));
        *chain.failing_lookups.lock() = u32::MAX;
        let committer = EvmCommitter::new(chain.clone(), settings());

        let started = tokio::time::Instant::now();
        let err = committer.commit(&record()).await.unwrap_err();
        assert!(matches!(err, LedgerError::MinedTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mined_wait_times_out() {
        let chain = Arc::new(ScriptedChain::default());
        let committer = EvmCommitter::new(chain.clone(), settings());

        let started = tokio::time::Instant::now();
        let err = committer.commit(&record()).await.unwrap_err();
        assert!(matches!(err, LedgerError::MinedTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_rpc() {
        let chain = Arc::new(ScriptedChain::mined(true));
        let committer = EvmCommitter::new(
            chain.clone(),
            ChainSettings { private_key: None, ..settings() },
        );

        assert!(matches!(committer.commit(&record()).await, Err(LedgerError::Config(_))));
        assert_eq!(*chain.nonce_calls.lock(), 0);
        assert!(chain.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_id_fetched_when_not_configured() {
        let chain = Arc::new(ScriptedChain::mined(true));
        let committer = EvmCommitter::new(chain.clone(), ChainSettings { chain_id: None, ..settings() });

        committer.commit(&record()).await.unwrap();
        assert_eq!(*chain.chain_id_calls.lock(), 1);
    }
}

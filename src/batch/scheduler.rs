//! Periodic batch cycle: drain the buffer, write the artifact, publish it,
//! commit the window on chain.
//!
//! Cycles are strictly sequential. A failed cycle never stops the loop; what
//! happens to its records is decided by [`RecoveryPolicy`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::batch::artifact::{ArtifactError, ArtifactStore, BatchArtifact};
use crate::batch::buffer::TradeBuffer;
use crate::batch::types::{Batch, Cid, LedgerCommitRecord, PublishedBatch};
use crate::config::{BatchSettings, RecoveryPolicy};
use crate::ledger::{LedgerCommitter, LedgerError, TxReceipt};
use crate::publish::{ContentPublisher, PublishError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Draining,
    Publishing,
    Committing,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("artifact stage: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("publish stage: {0}")]
    Publish(#[from] PublishError),
    #[error("commit stage: {0}")]
    Commit(#[from] LedgerError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing was buffered; no artifact, no network calls.
    Empty,
    Committed {
        records: usize,
        cid: Cid,
        artifact: PathBuf,
        receipt: TxReceipt,
    },
    Failed {
        records: usize,
        artifact: Option<PathBuf>,
        requeued: bool,
        error: CycleError,
    },
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Empty => "empty",
            CycleOutcome::Committed { .. } => "committed",
            CycleOutcome::Failed { error: CycleError::Artifact(_), .. } => "artifact_failed",
            CycleOutcome::Failed { error: CycleError::Publish(_), .. } => "publish_failed",
            CycleOutcome::Failed { error: CycleError::Commit(_), .. } => "commit_failed",
        }
    }
}

/// Why a cycle stopped, with the batch handed back so it can be recovered.
struct StageFailure {
    batch: Batch,
    artifact: Option<PathBuf>,
    error: CycleError,
}

pub struct BatchScheduler {
    buffer: Arc<dyn TradeBuffer>,
    artifacts: ArtifactStore,
    publisher: Arc<dyn ContentPublisher>,
    committer: Arc<dyn LedgerCommitter>,
    period: Duration,
    policy: RecoveryPolicy,
    flush_on_shutdown: bool,
    window_start: u64,
    state: CycleState,
    /// Artifacts of requeued batches. The next artifact written holds all of
    /// their records, so they are deleted once it is on disk.
    superseded: Vec<PathBuf>,
}

impl BatchScheduler {
    pub fn new(
        buffer: Arc<dyn TradeBuffer>,
        publisher: Arc<dyn ContentPublisher>,
        committer: Arc<dyn LedgerCommitter>,
        settings: &BatchSettings,
    ) -> Self {
        Self {
            buffer,
            artifacts: ArtifactStore::new(&settings.artifact_dir),
            publisher,
            committer,
            period: settings.period(),
            policy: settings.on_failure,
            flush_on_shutdown: settings.flush_on_shutdown,
            window_start: Utc::now().timestamp().max(0) as u64,
            state: CycleState::Idle,
            superseded: Vec::new(),
        }
    }

    /// Overrides where the first window starts (unix seconds).
    pub fn with_window_start(mut self, start: u64) -> Self {
        self.window_start = start;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.run_cycle_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(window_start = self.window_start))]
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.state = CycleState::Draining;
        let Some(records) = self.buffer.drain_all() else {
            self.state = CycleState::Idle;
            debug!("No trades in this interval, skipping");
            return self.finish(CycleOutcome::Empty);
        };

        let batch = Batch::new(records, now, self.window_start);
        let records = batch.len();
        info!(records, start = batch.start_time, end = batch.end_time, "Drained batch");

        let outcome = match self.process(batch).await {
            Ok((published, artifact, receipt)) => {
                self.window_start = published.batch.end_time;
                CycleOutcome::Committed { records, cid: published.cid, artifact: artifact.path, receipt }
            }
            Err(failure) => self.recover(failure),
        };
        self.state = CycleState::Idle;
        self.finish(outcome)
    }

    async fn process(&mut self, batch: Batch) -> Result<(PublishedBatch, BatchArtifact, TxReceipt), StageFailure> {
        let artifact = match self.artifacts.write(&batch).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(StageFailure { batch, artifact: None, error: e.into() }),
        };
        self.discard_superseded(&artifact).await;

        self.state = CycleState::Publishing;
        let cid = match self.publisher.publish(&artifact).await {
            Ok(cid) => cid,
            Err(e) => {
                return Err(StageFailure { batch, artifact: Some(artifact.path), error: e.into() })
            }
        };
        let published = PublishedBatch { batch, cid };

        self.state = CycleState::Committing;
        match self.committer.commit(&published.commit_record()).await {
            Ok(receipt) => Ok((published, artifact, receipt)),
            Err(e) => Err(StageFailure {
                batch: published.batch,
                artifact: Some(artifact.path),
                error: e.into(),
            }),
        }
    }

    /// Records go back into the buffer under `Requeue`, and always when no
    /// artifact was written, since then memory holds the only copy.
    fn recover(&mut self, failure: StageFailure) -> CycleOutcome {
        let StageFailure { batch, artifact, error } = failure;
        let records = batch.len();
        let requeue = artifact.is_none() || self.policy == RecoveryPolicy::Requeue;

        if requeue {
            warn!(
                records,
                artifact = ?artifact,
                error = %error,
                "Batch cycle failed, records requeued for next cycle"
            );
            self.buffer.requeue(batch.into_records());
            if let Some(path) = &artifact {
                self.superseded.push(path.clone());
            }
        } else {
            error!(
                records,
                artifact = ?artifact,
                error = %error,
                "Batch cycle failed, records dropped from memory; resubmit from the artifact"
            );
            self.window_start = batch.end_time;
        }

        CycleOutcome::Failed { records, artifact, requeued: requeue, error }
    }

    async fn discard_superseded(&mut self, replacement: &BatchArtifact) {
        if self.superseded.is_empty() {
            return;
        }
        let replaced = std::mem::take(&mut self.superseded);
        info!(
            artifact = %replacement.path.display(),
            replaced = ?replaced,
            "Requeued records rewritten, removing superseded artifacts"
        );
        for path in &replaced {
            if let Err(e) = ArtifactStore::discard(path).await {
                warn!(error = %e, "Could not remove superseded artifact");
            }
        }
    }

    fn finish(&self, outcome: CycleOutcome) -> CycleOutcome {
        metrics::counter!("trade_anchor_cycles_total", "outcome" => outcome.label()).increment(1);
        metrics::gauge!("trade_anchor_pending_trades").set(self.buffer.len() as f64);
        if let CycleOutcome::Committed { records, cid, receipt, .. } = &outcome {
            info!(records, cid = %cid, tx_hash = %receipt.tx_hash, block = receipt.block_number, "Batch committed");
        }
        outcome
    }

    /// Runs a cycle every period until `shutdown` flips to `true` (or its
    /// sender goes away), then optionally flushes once more.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, policy = ?self.policy, "Batch scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.flush_on_shutdown && !self.buffer.is_empty() {
            info!(pending = self.buffer.len(), "Flushing pending trades before shutdown");
            self.run_cycle().await;
        }
        info!("Batch scheduler stopped");
    }
}

/// Publishes and commits a batch that was left on disk by a failed cycle.
#[instrument(skip(publisher, committer))]
pub async fn resubmit_artifact(
    path: &Path,
    start_time: u64,
    end_time: u64,
    publisher: &dyn ContentPublisher,
    committer: &dyn LedgerCommitter,
) -> Result<(Cid, TxReceipt), CycleError> {
    let artifact = ArtifactStore::read(path).await?;
    let cid = publisher.publish(&artifact).await?;
    let record = LedgerCommitRecord { start_time, end_time, cid: cid.clone() };
    let receipt = committer.commit(&record).await?;
    Ok((cid, receipt))
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use trade_anchor::api::{create_router, AppState};
use trade_anchor::batch::scheduler::resubmit_artifact;
use trade_anchor::batch::{BatchScheduler, MemoryTradeBuffer, TradeBuffer};
use trade_anchor::config::Settings;
use trade_anchor::ledger::committer::EvmCommitter;
use trade_anchor::ledger::rpc::JsonRpcClient;
use trade_anchor::ledger::{ChainRpc, LedgerCommitter};
use trade_anchor::publish::pinata::PinataPublisher;
use trade_anchor::publish::ContentPublisher;
use trade_anchor::telemetry;

#[derive(Parser)]
#[command(name = "trade-anchor", version, about = "Batches trades to IPFS and anchors each batch on chain")]
struct Cli {
    /// TOML settings file (defaults to ./trade-anchor.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion server and the batch scheduler (default)
    Serve,
    /// Publish and commit a batch artifact left behind by a failed cycle
    Resubmit {
        #[arg(long)]
        artifact: PathBuf,
        /// Window start, unix seconds (default: end minus one batch period)
        #[arg(long)]
        start: Option<u64>,
        /// Window end, unix seconds (default: artifact modification time)
        #[arg(long)]
        end: Option<u64>,
    },
}

struct Pipeline {
    publisher: Arc<dyn ContentPublisher>,
    committer: Arc<dyn LedgerCommitter>,
}

fn build_pipeline(settings: &Settings) -> anyhow::Result<Pipeline> {
    let publisher = PinataPublisher::new(&settings.store).context("building store client")?;
    let rpc: Arc<dyn ChainRpc> = Arc::new(JsonRpcClient::new(settings.chain.rpc_url.clone().unwrap_or_default()));
    let committer = EvmCommitter::new(rpc, settings.chain.clone());
    Ok(Pipeline { publisher: Arc::new(publisher), committer: Arc::new(committer) })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info");

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Resubmit { artifact, start, end } => resubmit(settings, &artifact, start, end).await,
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    telemetry::init_metrics(settings.server.metrics_port)?;
    let pipeline = build_pipeline(&settings)?;

    let buffer: Arc<dyn TradeBuffer> = Arc::new(MemoryTradeBuffer::new());
    let scheduler = BatchScheduler::new(buffer.clone(), pipeline.publisher, pipeline.committer, &settings.batch);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let app = create_router(AppState::new(buffer), &settings.server).context("invalid allowed origin")?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.server.port))
        .await
        .with_context(|| format!("binding port {}", settings.server.port))?;
    info!(addr = %listener.local_addr()?, origin = %settings.server.allowed_origin, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("Shutdown requested");
        })
        .await;

    let _ = shutdown_tx.send(true);
    scheduler_task.await.context("scheduler task panicked")?;
    served.context("http server")?;
    Ok(())
}

fn modified_unix_secs(path: &Path) -> anyhow::Result<u64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("reading modification time of {}", path.display()))?;
    Ok(modified.duration_since(UNIX_EPOCH)?.as_secs())
}

async fn resubmit(settings: Settings, artifact: &Path, start: Option<u64>, end: Option<u64>) -> anyhow::Result<()> {
    let end = match end {
        Some(end) => end,
        None => modified_unix_secs(artifact)?,
    };
    let start = start.unwrap_or_else(|| end.saturating_sub(settings.batch.period_secs));
    anyhow::ensure!(start < end, "window start {} must be before end {}", start, end);

    let pipeline = build_pipeline(&settings)?;
    let (cid, receipt) =
        resubmit_artifact(artifact, start, end, pipeline.publisher.as_ref(), pipeline.committer.as_ref())
            .await
            .with_context(|| format!("resubmitting {}", artifact.display()))?;

    info!(cid = %cid, tx_hash = %receipt.tx_hash, block = receipt.block_number, start, end, "Artifact committed");
    Ok(())
}

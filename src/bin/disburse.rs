//! # Disburse CLI
//!
//! Plans or runs a bulk disbursement from a file of rows. `plan` prints the
//! shard layout without submitting anything; `run` executes the whole
//! pipeline in this process against the in-memory queue and store.
//!
//! With PostgreSQL configured, `dispatch` submits shards to a pgmq queue and
//! waits on the shard ledger for the recon, while `work` runs a worker
//! process that drains the queue until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use disburse_core::config::ConfigManager;
use disburse_core::ingest::load_rows;
use disburse_core::logging::init_structured_logging;
use disburse_core::models::PayloadType;
use disburse_core::orchestration::{run_in_process, Collaborators, DisbursementPipeline};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "disburse")]
#[command(about = "Sharded bulk disbursement")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment (development, test, production); detected from DISBURSE_ENV when absent
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
pub struct JobArgs {
    /// JSON array or JSON Lines file of {"amount", "to"} rows
    #[arg(short, long)]
    input: PathBuf,

    /// Store kind the entities are written under
    #[arg(short, long)]
    kind: String,

    /// Payload type: 1=WalletData, 2=Voucher, 3=Pair
    #[arg(short = 't', long = "type", default_value = "1")]
    payload_type: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate and partition rows, printing the shard plan
    Plan(JobArgs),

    /// Partition, dispatch, execute and reconcile in this process
    Run(JobArgs),

    /// Dispatch shards to the PostgreSQL queue and reconcile from the ledger
    #[cfg(feature = "postgres")]
    Dispatch(JobArgs),

    /// Process shard tasks from the PostgreSQL queue until interrupted
    #[cfg(feature = "postgres")]
    Work,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let environment = cli.env.clone().unwrap_or_else(ConfigManager::detect_environment);
    let config = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .context("failed to load configuration")?;
    init_structured_logging(config.environment(), &config.config().logging);

    match cli.command {
        Commands::Plan(args) => plan(config, args),
        Commands::Run(args) => run(config, args).await,
        #[cfg(feature = "postgres")]
        Commands::Dispatch(args) => postgres::dispatch(config, args).await,
        #[cfg(feature = "postgres")]
        Commands::Work => postgres::work(config).await,
    }
}

fn plan(config: std::sync::Arc<ConfigManager>, args: JobArgs) -> Result<()> {
    let payload_type = PayloadType::try_from(args.payload_type)?;
    let rows = load_rows(&args.input)?;

    let backends = Collaborators::in_memory(config.config().dispatch.queue_name.clone());
    let pipeline = DisbursementPipeline::new(config, backends.collaborators);
    let request = pipeline.plan(&rows, &args.kind, payload_type)?;

    let shards: Vec<_> = pipeline
        .dispatcher()
        .shards_for(&request)
        .iter()
        .map(|shard| {
            json!({
                "shard_id": shard.id(),
                "chunk_index": shard.chunk_index(),
                "children": shard.children().len(),
                "amount": shard.amount(),
            })
        })
        .collect();

    let plan = json!({
        "job_id": request.job_id(),
        "kind": request.kind(),
        "payload_type": payload_type.discriminator(),
        "entities": request.total_entities(),
        "total_amount": request.total_amount(),
        "shards": shards,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn print_report(
    job_id: &str,
    kind: &str,
    report: &disburse_core::orchestration::ReconReport,
    failed_shard_ids: &[disburse_core::models::ShardId],
) -> Result<()> {
    let output = json!({
        "job_id": job_id,
        "kind": kind,
        "recon": report.recon,
        "retry_candidates": report.retry_candidates,
        "partial_shards": report.partial_shards,
        "failed_shard_ids": failed_shard_ids,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(config: std::sync::Arc<ConfigManager>, args: JobArgs) -> Result<()> {
    let payload_type = PayloadType::try_from(args.payload_type)?;
    let rows = load_rows(&args.input)?;
    info!(rows = rows.len(), input = %args.input.display(), "Starting in-process run");

    let backends = Collaborators::in_memory(config.config().dispatch.queue_name.clone());
    let summary = run_in_process(config, backends, &rows, &args.kind, payload_type)
        .await
        .context("disbursement run failed")?;

    print_report(
        &summary.job_id,
        &summary.kind,
        &summary.report,
        &summary.dispatch.failed_shard_ids,
    )
}

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use disburse_core::keys::UuidKeyGenerator;
    use sqlx::PgPool;
    use std::sync::Arc;
    use tokio::sync::watch;

    async fn connect(config: &ConfigManager) -> Result<PgPool> {
        let url = config
            .config()
            .datastore
            .database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .context("datastore.database_url or DATABASE_URL must be set")?;
        PgPool::connect(&url)
            .await
            .context("failed to connect to PostgreSQL")
    }

    pub async fn dispatch(config: Arc<ConfigManager>, args: JobArgs) -> Result<()> {
        let payload_type = PayloadType::try_from(args.payload_type)?;
        let rows = load_rows(&args.input)?;

        let pool = connect(&config).await?;
        let (collaborators, _queue) = Collaborators::postgres(
            pool,
            &config.config().dispatch.queue_name,
            Arc::new(UuidKeyGenerator),
        )
        .await?;
        let pipeline = DisbursementPipeline::new(config, collaborators);

        let request = pipeline.plan(&rows, &args.kind, payload_type)?;
        let outcome = pipeline.dispatch(&request).await;
        info!(
            job_id = %outcome.job_id,
            shards = outcome.shards.len(),
            failed = outcome.failed_shard_ids.len(),
            "Dispatched, waiting for workers"
        );

        let report = pipeline
            .await_reconciliation(&outcome)
            .await
            .context("reconciliation did not complete")?;
        print_report(request.job_id(), request.kind(), &report, &outcome.failed_shard_ids)
    }

    pub async fn work(config: Arc<ConfigManager>) -> Result<()> {
        let pool = connect(&config).await?;
        let (collaborators, queue) = Collaborators::postgres(
            pool,
            &config.config().dispatch.queue_name,
            Arc::new(UuidKeyGenerator),
        )
        .await?;
        let worker_config = config.config().worker.clone();
        let pipeline = DisbursementPipeline::new(config, collaborators);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = tokio::spawn(pipeline.runner().run_pgmq(
            queue,
            worker_config.visibility_timeout_seconds,
            worker_config.poll_interval(),
            shutdown_rx,
        ));

        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        info!("Shutdown requested, finishing in-flight shards");
        let _ = shutdown_tx.send(true);

        let stats = runner.await.context("worker runner panicked")?;
        println!("{}", serde_json::to_string_pretty(&json!({
            "tasks_received": stats.tasks_received,
            "shards_completed": stats.shards_completed,
            "shards_failed": stats.shards_failed,
        }))?);
        Ok(())
    }
}

//! # Cronny: schedule and workflow execution service
//!
//! Runs the four engine loops in one process:
//! trigger creator, trigger executor, execution cleaner, stats collector.
//!
//! Usage:
//!   cronny                       # Start with defaults (~/.cronny/cronny.db)
//!   cronny --db-path ./dev.db    # Custom database location
//!   cronny --verbose             # Debug logging

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cronny_actions::ActionRegistry;
use cronny_core::CronnyConfig;
use cronny_scheduler::{
    ExecutionCleaner, SqliteStore, StatsCollector, Store, TriggerCreator, TriggerExecutor,
    WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "cronny", version, about = "⏰ Cronny: schedule and workflow execution service")]
struct Cli {
    /// SQLite database path (default: ~/.cronny/cronny.db or CRONNY_DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cronny=debug,cronny_scheduler=debug,cronny_actions=debug"
    } else {
        "cronny=info,cronny_scheduler=info,cronny_actions=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = CronnyConfig::from_env();
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let db_path = cli.db_path.unwrap_or_else(|| config.db_path.clone());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).map_err(|e| anyhow::anyhow!("{e}"))?);
    let registry = Arc::new(ActionRegistry::builtin());
    let engine = Arc::new(WorkflowEngine::new(store.clone(), registry.clone()));

    println!("⏰ Cronny v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:  {}", db_path.display());
    println!("   🌍 Env:       {}", config.env);
    println!("   🔧 Executors: {}", registry.names().join(", "));
    println!();

    let cancel = CancellationToken::new();

    let creator = TriggerCreator::new(store.clone(), cancel.clone());
    let executor = Arc::new(
        TriggerExecutor::new(store.clone(), engine, cancel.clone())
            .with_limits(config.executor_concurrency, config.trigger_queue_capacity),
    );
    let cleaner = ExecutionCleaner::new(store.clone(), cancel.clone())
        .with_limit(config.allowed_job_executions_per_job);
    let stats = StatsCollector::new(cancel.clone());

    let mut handles = Vec::new();
    handles.push(tokio::spawn(async move { creator.run().await }));
    handles.push(tokio::spawn(executor.run()));
    handles.push(tokio::spawn(async move { cleaner.run().await }));
    handles.push(tokio::spawn(async move { stats.run().await }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("all services stopped");
    Ok(())
}

use std::{io::IsTerminal, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use fib_pipeline::{
    api::{self, AppState},
    cli::{ApiArgs, Cli, Command, StoreArgs, WorkerArgs},
    client,
    ingest::IngestionService,
    query::QueryService,
    store::{journal::JournalLog, remote::RemoteStore, server::StoreServer},
    worker::ComputeWorker,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Store(args) => run_store(args).await?,
        Command::Api(args) => run_api(args).await?,
        Command::Worker(args) => run_worker(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn run_store(args: StoreArgs) -> Result<()> {
    let log = JournalLog::open(&args.data_dir).await?;
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind store to {}", args.listen))?;
    let server = StoreServer::new(listener, Arc::new(log));
    let addr = server.local_addr()?;
    info!("store listening on {}", addr);
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("store exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_api(args: ApiArgs) -> Result<()> {
    let policy = args.connect.retry_policy();
    let store = Arc::new(RemoteStore::connect_with_retry(args.connect.store, policy).await?);

    let state = AppState {
        ingest: IngestionService::new(store.clone(), store.clone(), store.clone())
            .with_max_index(args.max_index),
        query: QueryService::new(store.clone(), store),
    };

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind api to {}", args.listen))?;
    let addr = listener.local_addr()?;
    info!(max_index = args.max_index, "accepting indexes up to the bound");
    info!("api listening on {}", addr);

    api::serve(listener, state, shutdown_signal()).await
}

async fn run_worker(args: WorkerArgs) -> Result<()> {
    let policy = args.connect.retry_policy();
    let store = Arc::new(RemoteStore::connect_with_retry(args.connect.store, policy).await?);
    let worker = ComputeWorker::new(store.clone(), store);

    tokio::select! {
        result = worker.run_forever(policy) => result,
        _ = shutdown_signal() => {
            info!("worker shutting down");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

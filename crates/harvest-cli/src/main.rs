use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use harvest_config::HarvestConfig;
use harvest_executor::{Executor, ExecutorApi, RegistryApi};
use harvest_sched::{QueueStateAggregator, ScheduleManager};
use harvest_store::ScheduleStore;

#[derive(Parser)]
#[command(name = "harvest", about = "Recurring scrape-job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Reconcile the executor with the persisted schedules
    Resync,
    /// Print the aggregated queue snapshot
    Queue,
    /// Check executor reachability
    Health,
}

struct Stack {
    store: Arc<ScheduleStore>,
    executor: Arc<ExecutorApi>,
    manager: Arc<ScheduleManager>,
    aggregator: Arc<QueueStateAggregator>,
}

/// Construct the service stack. The executor and registry clients are
/// built first and injected into the manager; nothing references back.
fn build_stack(config: &HarvestConfig) -> anyhow::Result<Stack> {
    let db_path = harvest_config::ensure_config_dir()?.join("harvest.db");
    let store = Arc::new(ScheduleStore::open(&db_path)?);
    let executor = Arc::new(ExecutorApi::new(
        &config.executor.base_url,
        Duration::from_secs(config.executor.timeout_secs),
    ));
    let registry = Arc::new(RegistryApi::new(
        &config.registry.base_url,
        Duration::from_secs(config.registry.timeout_secs),
    ));
    let manager = Arc::new(ScheduleManager::new(
        store.clone(),
        executor.clone(),
        registry,
        config.scheduler.failure_lock_threshold,
    ));
    let aggregator = Arc::new(QueueStateAggregator::new(store.clone(), executor.clone()));
    Ok(Stack {
        store,
        executor,
        manager,
        aggregator,
    })
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command))
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = harvest_config::load_config().unwrap_or_default();
    let stack = build_stack(&config)?;

    match command {
        Commands::Serve { port } => {
            // Startup reachability probe; failure is logged, not fatal.
            if let Err(e) = stack.executor.health_check().await {
                tracing::warn!("Executor health check failed: {e}");
            }
            // Reconcile once so the executor matches the store before
            // serving mutations.
            if let Err(e) = stack.manager.resync().await {
                tracing::warn!("Startup resync failed: {e}");
            }

            let state = Arc::new(harvest_api::ApiState {
                manager: stack.manager.clone(),
                aggregator: stack.aggregator.clone(),
                store: stack.store.clone(),
            });
            let port = port.unwrap_or(config.api.port);
            harvest_api::serve(state, &config.api.host, port).await
        }
        Commands::Resync => {
            let report = stack.manager.resync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Queue => {
            let queue = stack.aggregator.get_queue_state().await?;
            println!("{}", serde_json::to_string_pretty(&queue)?);
            Ok(())
        }
        Commands::Health => match stack.executor.health_check().await {
            Ok(()) => {
                println!("executor: ok");
                Ok(())
            }
            Err(e) => {
                println!("executor: unreachable ({e})");
                std::process::exit(1);
            }
        },
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use harvest::error::get_error_info;
use harvest::rehearsal::rehearse;
use harvest::gateway::{BridgeFactory, ClientFactory, ScriptedFactory, SessionGateway, SessionVault};
use harvest::{
    load_config, HarvestConfig, HarvestDb, HarvestError, HarvestQueue, NewTask, Result, SortOrder,
    TaskRef, WorkerPool, WorkerSettings,
};

#[derive(Parser)]
#[command(name = "harvester")]
#[command(about = "Channel harvester - credential-pool orchestrator backed by PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: .harvest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the database schema
    InitDb {
        /// Database URL (overrides config and DATABASE_URL)
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Run workers that lease and harvest queued work items
    Worker {
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<u32>,

        /// Drain the queue once and exit instead of polling
        #[arg(long)]
        once: bool,

        /// Drain a scripted, in-memory copy of the queue and print the reports
        /// without writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Queue a task with one work item per locator
    Submit {
        /// Content URLs, e.g. https://t.me/channel/123
        #[arg(required = true)]
        locators: Vec<String>,

        /// Maximum number of replies per work item
        #[arg(short, long, default_value_t = NewTask::DEFAULT_LIMIT)]
        limit: u32,

        /// Newest replies first
        #[arg(long)]
        desc: bool,
    },

    /// Show a task and its results (numeric id or correlation UUID)
    Status { task: TaskRef },

    /// Put a banned or errored credential back into rotation
    ResetHealth { login: String },

    /// Delete a task with its work items and results
    DeleteTask { task: TaskRef },
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(cli.config.clone()).await {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };
    init_tracing(&config.log_level);

    if let Err(e) = run(cli.command, config).await {
        error!("{}", e);
        exit_with(&e);
    }
}

fn exit_with(e: &HarvestError) -> ! {
    let (description, fix) = get_error_info(e.code()).unwrap_or(("", ""));
    eprintln!(
        "{}",
        serde_json::json!({
            "error": {
                "code": e.code(),
                "message": e.to_string(),
                "description": description,
                "fix": fix,
            }
        })
    );
    std::process::exit(e.exit_code())
}

async fn run(command: Commands, config: HarvestConfig) -> Result<()> {
    match command {
        Commands::InitDb { url } => {
            let url = url.unwrap_or_else(|| config.database_url.clone());
            let db = HarvestDb::new(&url, config.worker_concurrency).await?;
            db.initialize_schema().await?;
            println!("Schema initialized");
            Ok(())
        }

        Commands::Worker {
            workers,
            once,
            dry_run,
        } => {
            let mut settings = WorkerSettings::from_config(&config);
            if let Some(workers) = workers {
                settings.concurrency = workers.max(1);
            }
            let db = HarvestDb::new(&config.database_url, settings.concurrency).await?;

            if dry_run {
                warn!("Dry run: scripted sessions against an in-memory copy of the queue");
                let reports = rehearse(&db, gateway(ScriptedFactory::new(), &config), settings)
                    .await?;
                print_json(&reports)
            } else {
                let factory = BridgeFactory::from_config(&config)?;
                if let Err(e) = factory.health().await {
                    warn!("Session bridge is not healthy yet: {}", e);
                }
                run_workers(db, factory, &config, settings, once).await
            }
        }

        Commands::Submit {
            locators,
            limit,
            desc,
        } => {
            let db = HarvestDb::new(&config.database_url, 1).await?;
            let task = NewTask::uniform(&locators, limit, SortOrder::from_ascending(!desc));
            let handle = HarvestQueue::new(db).submit(&task).await?;
            print_json(&handle)
        }

        Commands::Status { task } => {
            let db = HarvestDb::new(&config.database_url, 1).await?;
            let report = HarvestQueue::new(db).status(task).await?;
            print_json(&report)
        }

        Commands::ResetHealth { login } => {
            let db = HarvestDb::new(&config.database_url, 1).await?;
            let credential = HarvestQueue::new(db).reset_health(&login).await?;
            print_json(&serde_json::json!({
                "login": credential.login,
                "health": credential.health.as_str(),
                "usage_count": credential.usage_count,
            }))
        }

        Commands::DeleteTask { task } => {
            let db = HarvestDb::new(&config.database_url, 1).await?;
            HarvestQueue::new(db).delete(task).await?;
            print_json(&serde_json::json!({ "deleted": task.to_string() }))
        }
    }
}

fn gateway<F: ClientFactory>(factory: F, config: &HarvestConfig) -> SessionGateway<F> {
    SessionGateway::new(
        factory,
        SessionVault::new(config.sessions_dir.clone()),
        config.flood_wait_ceiling,
    )
}

async fn run_workers<F>(
    db: HarvestDb,
    factory: F,
    config: &HarvestConfig,
    settings: WorkerSettings,
    once: bool,
) -> Result<()>
where
    F: ClientFactory + 'static,
    F::Client: 'static,
{
    let pool = WorkerPool::new(db, gateway(factory, config), settings);

    if once {
        let processed = pool.drain("worker-once").await?;
        info!("Processed {} work item(s)", processed);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing in-flight work items");
            shutdown_tx.send(true).ok();
        }
    });
    pool.run(shutdown_rx).await
}

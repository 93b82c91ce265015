mod callbacks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use chime_engine::EngineConfig;
use chime_service::SchedulerService;
use chime_store::SqliteJobStore;
use chime_types::CallbackArgs;

#[derive(Parser)]
#[command(name = "chime", about = "Job scheduling service CLI")]
struct Cli {
    /// Config file path (defaults to ~/.chime/config.json5)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling engine in the foreground
    Run,
    /// Schedule a job from schedule text
    Add {
        /// Job name
        name: String,
        /// When to run, e.g. "in 5 minutes", "every day at 9am", "0 9 * * 1-5"
        when: String,
        /// Callback as "module.function"
        #[arg(long, default_value = "log.message")]
        callback: String,
        /// Callback arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// List all jobs
    List,
    /// Show a job's status
    Status {
        /// Job ID
        id: String,
    },
    /// Cancel (delete) a job
    Cancel {
        /// Job ID
        id: String,
    },
    /// Pause a job, keeping its record
    Pause {
        /// Job ID
        id: String,
    },
    /// Resume a paused job
    Resume {
        /// Job ID
        id: String,
    },
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
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => chime_config::load_config_from(path)?,
        None => chime_config::load_config().unwrap_or_default(),
    };

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteJobStore::open(&db_path)?);
    let registry = Arc::new(callbacks::builtin_registry());
    let engine_config = EngineConfig {
        tick_interval: config.engine.tick_interval(),
        error_backoff: config.engine.error_backoff(),
        dispatch_timeout: config.engine.dispatch_timeout(),
        retry_backoff: config.engine.retry_backoff(),
    };
    let service = SchedulerService::new(store, registry, engine_config);

    match cli.command {
        Commands::Run => {
            service.start().await?;
            tokio::signal::ctrl_c().await?;
            service.shutdown().await;
        }
        Commands::Add {
            name,
            when,
            callback,
            args,
        } => {
            let args: Option<CallbackArgs> = args
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("--args must be a JSON object")?;
            let id = service
                .schedule_from_text(&name, &when, &callback, args)
                .await?;
            println!("{id}");
        }
        Commands::List => {
            for job in service.list_jobs().await? {
                let state = if job.is_active { "active" } else { "paused" };
                let next = job
                    .next_run_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<9} {:<6} {:<8} {:<24} next: {next}",
                    job.id,
                    job.status.as_str(),
                    state,
                    job.schedule_type.as_str(),
                    job.name
                );
            }
        }
        Commands::Status { id } => match service.job_status(&id).await? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => anyhow::bail!("job not found: {id}"),
        },
        Commands::Cancel { id } => {
            if !service.cancel_job(&id).await? {
                anyhow::bail!("job not found: {id}");
            }
            println!("cancelled {id}");
        }
        Commands::Pause { id } => {
            if !service.pause_job(&id).await? {
                anyhow::bail!("job not found: {id}");
            }
            println!("paused {id}");
        }
        Commands::Resume { id } => {
            if !service.resume_job(&id).await? {
                anyhow::bail!("job not found: {id}");
            }
            println!("resumed {id}");
        }
    }

    Ok(())
}

//! jobmesh - the scheduling core of a distributed job system.
//!
//! Usage:
//!   jobmesh run <config>          Run the scheduler with the jobs in a config file
//!   jobmesh validate <config>     Validate a config file without running
//!   jobmesh list <config>         List the jobs a config file declares
//!   jobmesh next-fire <expr>      Print upcoming fire times of a schedule

use chrono::Utc;
use clap::{Parser, Subcommand};
use jobmesh::{
    ComponentRegistry, CoreConfig, HandlerError, HandlerRegistry, InMemoryJobStore,
    JobConfigManager, JobHandler, JobStore, LocalDispatcher, RouterSet, RoutingDispatcher,
    Schedule, ScheduleType, Scheduler, StaticCandidates, TriggerDispatcher, YamlLoader,
    build_compiler, register_jobs,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// jobmesh - distributed job scheduling core
#[derive(Parser)]
#[command(name = "jobmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the jobs in a config file
    Run {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Validate a config file without running
    Validate {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the jobs declared in a config file
    List {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Print the next fire times of a schedule expression
    NextFire {
        /// Cron expression, or interval in milliseconds with --fixed-interval
        #[arg(value_name = "EXPR")]
        expression: String,

        /// Number of fire times to print
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// IANA timezone for cron evaluation
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Treat the expression as a fixed interval in milliseconds
        #[arg(long)]
        fixed_interval: bool,
    },
}

/// Built-in handler that logs its parameter.
struct LogHandler;

impl JobHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError> {
        info!(param = param.unwrap_or(""), "log handler executed");
        Ok(param.map(str::to_string))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_scheduler(config).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::List { config } => {
            list_jobs(config)?;
        }
        Commands::NextFire {
            expression,
            count,
            timezone,
            fixed_interval,
        } => {
            next_fire(&expression, count, &timezone, fixed_interval)?;
        }
    }

    Ok(())
}

async fn open_store(config: &CoreConfig) -> Result<Arc<dyn JobStore>, Box<dyn std::error::Error>> {
    match &config.storage {
        jobmesh::config::StorageConfig::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        #[cfg(feature = "sqlite")]
        jobmesh::config::StorageConfig::Sqlite { path } => {
            Ok(Arc::new(jobmesh::SqliteJobStore::new(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        jobmesh::config::StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requires the `sqlite` feature".into())
        }
    }
}

/// Run the scheduler with the jobs in a config file.
async fn run_scheduler(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading config from: {}", path.display());
    let config = YamlLoader::load(&path)?;
    let timezone = config.resolve_timezone()?;

    let store = open_store(&config).await?;

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(Arc::new(LogHandler));

    let components = Arc::new(ComponentRegistry::from_map(config.components.clone()));
    let compiler = build_compiler(&config.glue.to_options(), components);
    let local = Arc::new(LocalDispatcher::new(store.clone(), handlers, compiler));

    let candidates = config.candidates();
    let dispatcher: Arc<dyn TriggerDispatcher> = if candidates.is_empty() {
        info!("No executors configured, jobs run in-process");
        local
    } else {
        info!("Routing to {} executor(s)", candidates.len());
        let routers = Arc::new(RouterSet::new(config.routing.to_options()));
        Arc::new(RoutingDispatcher::new(
            store.clone(),
            routers,
            Arc::new(StaticCandidates::new(candidates)),
            local,
        ))
    };

    let manager = JobConfigManager::new(store.clone(), dispatcher.clone()).with_timezone(timezone);
    let ids = register_jobs(&config.jobs, &manager).await?;
    if ids.is_empty() {
        warn!("No jobs configured in {}", path.display());
    }

    for job in manager.list_jobs().await? {
        info!(
            "  - {} [{}] {} {} ({})",
            job.name, job.id, job.schedule_type, job.schedule_expression, job.status
        );
    }

    let scheduler = Scheduler::new(store, dispatcher)
        .with_timezone(timezone)
        .with_options(config.scheduler.to_options());

    info!(
        "Starting scheduler (tick interval: {}ms)...",
        config.scheduler.tick_interval_ms
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task) = scheduler.start().await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate a config file without running.
fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating config: {}", path.display());

    match YamlLoader::load(&path) {
        Ok(config) => {
            info!("Config is valid, {} job(s):", config.jobs.len());
            for job in &config.jobs {
                info!("  - {}: OK", job.name);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the jobs declared in a config file.
fn list_jobs(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = YamlLoader::load(&path)?;

    if config.jobs.is_empty() {
        println!("No jobs declared in {}", path.display());
        return Ok(());
    }

    println!("Jobs in {}:", path.display());
    println!();

    for job in &config.jobs {
        println!("Name: {}", job.name);
        println!("  Schedule: {} ({})", job.schedule, job.schedule_type);
        if job.is_script() {
            println!("  Handler: <script>");
        } else {
            println!("  Handler: {}", job.handler);
        }
        if let Some(param) = &job.param {
            println!("  Param: {}", param);
        }
        println!("  Auto start: {}", job.auto_start);
        if let Some(strategy) = job.route_strategy {
            println!("  Route strategy: {}", strategy);
        }
        println!("  Misfire: {}", job.misfire_strategy);
        if job.fail_retry_count > 0 {
            println!("  Retries: {}", job.fail_retry_count);
        }
        println!();
    }

    Ok(())
}

/// Print upcoming fire times of a schedule expression.
fn next_fire(
    expression: &str,
    count: usize,
    timezone: &str,
    fixed_interval: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let timezone = jobmesh::core::schedule::parse_timezone(timezone)?;
    let schedule_type = if fixed_interval {
        ScheduleType::FixedInterval
    } else {
        ScheduleType::Cron
    };
    let schedule = Schedule::parse(schedule_type, expression, timezone)?;

    let times = schedule.next_n_after(Utc::now(), count);
    if times.is_empty() {
        println!("No upcoming fire times for '{}'", expression);
        return Ok(());
    }
    for time in times {
        println!("{}", time.with_timezone(&timezone).to_rfc3339());
    }
    Ok(())
}

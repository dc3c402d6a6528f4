#![cfg_attr(test, allow(clippy::unwrap_used))]

//! NetBill Enforcement Worker
//!
//! Runs the enforcement workflows on independent timers:
//! - Suspension check (SUSPENSION_CHECK_INTERVAL_SECS, default hourly)
//! - Restoration check (RESTORATION_CHECK_INTERVAL_SECS, default every 15 minutes)
//! - Payment reconciliation (PAYMENT_RECONCILIATION_INTERVAL_SECS, default every 5 minutes)
//!
//! Maintenance jobs:
//! - Heartbeat (every 5 minutes)
//! - Suspension audit purge (daily at 03:00 UTC)
//!
//! `netbill-worker --once suspend|restore|reconcile` runs a single workflow,
//! prints its JSON report and exits.

use std::sync::Arc;

use anyhow::{bail, Context};
use netbill_billing::{shutdown, EnforcementConfig, EnforcementEngine, Scheduler};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Pool size: three workflows plus maintenance, each using one connection at a time
const MAX_DB_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Workflow {
    Suspend,
    Restore,
    Reconcile,
}

impl std::str::FromStr for Workflow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suspend" => Ok(Self::Suspend),
            "restore" => Ok(Self::Restore),
            "reconcile" => Ok(Self::Reconcile),
            other => bail!("unknown workflow '{}', expected suspend|restore|reconcile", other),
        }
    }
}

/// `Some(workflow)` for one-shot mode, `None` to run the service
fn parse_args(args: &[String]) -> anyhow::Result<Option<Workflow>> {
    match args {
        [] => Ok(None),
        [flag, workflow] if flag == "--once" => Ok(Some(workflow.parse()?)),
        _ => bail!("usage: netbill-worker [--once suspend|restore|reconcile]"),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_once(engine: &EnforcementEngine, workflow: Workflow) -> anyhow::Result<()> {
    let json = match workflow {
        Workflow::Suspend => serde_json::to_string_pretty(&engine.run_suspension_check().await)?,
        Workflow::Restore => serde_json::to_string_pretty(&engine.run_restoration_check().await)?,
        Workflow::Reconcile => {
            serde_json::to_string_pretty(&engine.run_payment_reconciliation().await)?
        }
    };
    println!("{}", json);
    Ok(())
}

/// Heartbeat and audit purge
async fn maintenance_scheduler(engine: Arc<EnforcementEngine>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Job 1: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Job 2: Purge old suspension attempts (daily at 03:00 UTC)
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let engine = engine.clone();
            Box::pin(async move {
                match engine.purge_audit_trail().await {
                    Ok(purged) => info!(purged = purged, "Suspension audit purge complete"),
                    Err(e) => error!(error = %e, "Suspension audit purge failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Suspension audit purge (03:00 UTC)");

    Ok(scheduler)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let once = parse_args(&args)?;

    info!("Starting NetBill Worker");

    let config = EnforcementConfig::from_env().context("invalid enforcement configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = netbill_shared::create_pool(&database_url, MAX_DB_CONNECTIONS)
        .await
        .context("failed to connect to database")?;
    netbill_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Database ready");

    let (trigger, shutdown) = shutdown::channel();
    let engine = Arc::new(EnforcementEngine::from_config(config, pool, shutdown.clone())?);

    if let Some(workflow) = once {
        return run_once(&engine, workflow).await;
    }

    let workflows = Scheduler::for_engine(engine.clone());
    info!(jobs = ?workflows.job_names(), "Starting workflow scheduler");
    let handle = workflows.start(shutdown);

    let mut maintenance = maintenance_scheduler(engine).await?;
    maintenance.start().await?;

    info!("NetBill Worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight runs");

    trigger.trigger();
    if let Err(e) = maintenance.shutdown().await {
        error!(error = %e, "Failed to stop maintenance scheduler");
    }
    handle.join().await;

    info!("NetBill Worker stopped");
    Ok(())
}

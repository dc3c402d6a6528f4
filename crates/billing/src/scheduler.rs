//! Periodic workflow runner
//!
//! Each registered job gets its own loop: sleep one interval, run, repeat.
//! A run is awaited before the next sleep starts, so a job never overlaps
//! itself. Runs execute in their own task; a panic is logged and the loop
//! carries on.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::shutdown::Shutdown;
use crate::EnforcementEngine;

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    name: String,
    interval: Duration,
    run: JobFn,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `run` to fire every `interval`
    pub fn every<F>(mut self, name: impl Into<String>, interval: Duration, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.jobs.push(Job {
            name: name.into(),
            interval,
            run: Arc::new(run),
        });
        self
    }

    /// The three enforcement workflows at their configured intervals
    pub fn for_engine(engine: Arc<EnforcementEngine>) -> Self {
        let schedule = engine.config().schedule.clone();

        let suspend = engine.clone();
        let restore = engine.clone();
        let reconcile = engine;

        Self::new()
            .every("suspension", schedule.suspension_interval, move || {
                let engine = suspend.clone();
                Box::pin(async move {
                    engine.run_suspension_check().await;
                })
            })
            .every("restoration", schedule.restoration_interval, move || {
                let engine = restore.clone();
                Box::pin(async move {
                    engine.run_restoration_check().await;
                })
            })
            .every("reconciliation", schedule.reconciliation_interval, move || {
                let engine = reconcile.clone();
                Box::pin(async move {
                    engine.run_payment_reconciliation().await;
                })
            })
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Spawn one loop per job; loops exit when `shutdown` fires
    pub fn start(self, shutdown: Shutdown) -> SchedulerHandle {
        let tasks = self
            .jobs
            .into_iter()
            .map(|job| {
                tracing::info!(job = %job.name, interval_secs = job.interval.as_secs(), "Scheduled job");
                tokio::spawn(run_loop(job, shutdown.clone()))
            })
            .collect();
        SchedulerHandle { tasks }
    }
}

async fn run_loop(job: Job, mut shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(job.interval) => {}
            _ = shutdown.wait() => break,
        }
        if shutdown.is_triggered() {
            break;
        }

        tracing::debug!(job = %job.name, "Running scheduled job");
        match tokio::spawn((job.run)()).await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                tracing::error!(job = %job.name, "Scheduled job panicked");
            }
            Err(e) => {
                tracing::error!(job = %job.name, error = %e, "Scheduled job was cancelled");
            }
        }
    }
    tracing::info!(job = %job.name, "Job loop stopped");
}

/// Running job loops
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Wait for every loop to exit; an in-flight run finishes first
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Job loop ended abnormally");
            }
        }
    }
}

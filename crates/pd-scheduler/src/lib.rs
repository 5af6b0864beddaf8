//! pd-scheduler
//!
//! Cron-style background jobs: the active-ticker price refresh and the
//! daily portfolio snapshot, plus the process lifecycle that drives them
//! (`stopped → running → stopped`). Start is idempotent; stop signals
//! every loop and waits for in-flight runs to finish.

pub mod cron;
pub mod ports;
pub mod refresh;
pub mod snapshot;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use crate::cron::{CronParseError, CronSchedule};
pub use crate::refresh::{RefreshConfig, RefreshJob, RefreshOutcome};
pub use crate::snapshot::{JobCounts, SnapshotJobService};

/// A unit of scheduled work. Implementations own their overlap guards
/// and never propagate errors out of a run.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_once(&self);
}

#[async_trait]
impl ScheduledJob for RefreshJob {
    fn name(&self) -> &'static str {
        "price-refresh"
    }

    async fn run_once(&self) {
        let _ = self.run().await;
    }
}

#[async_trait]
impl ScheduledJob for SnapshotJobService {
    fn name(&self) -> &'static str {
        "daily-snapshot"
    }

    async fn run_once(&self) {
        let _ = self.run_daily(None).await;
    }
}

/// One job bound to its schedule.
pub struct JobSpec {
    pub schedule: CronSchedule,
    pub timezone: Tz,
    pub job: Arc<dyn ScheduledJob>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Job-loop host. `start` spawns one timer loop per job; `stop` signals
/// shutdown and joins them.
#[derive(Default)]
pub struct Scheduler {
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the job loops. Calling on an already-running scheduler is a
    /// warning, not an error, and leaves the running instance untouched.
    pub async fn start(&self, jobs: Vec<JobSpec>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(jobs.len());
        for spec in jobs {
            info!(job = spec.job.name(), "scheduling job");
            handles.push(tokio::spawn(job_loop(spec, shutdown_rx.clone())));
        }

        *running = Some(Running {
            shutdown: shutdown_tx,
            handles,
        });
        info!("scheduler started");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Signal shutdown and wait for in-flight job runs to complete.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            debug!("scheduler not running, nothing to stop");
            return;
        };

        info!("stopping scheduler");
        let _ = running.shutdown.send(true);
        for handle in running.handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

async fn job_loop(spec: JobSpec, mut shutdown: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let next = spec.schedule.next_after(now, spec.timezone);
        let delay = (next - now).to_std().unwrap_or_default();
        debug!(job = spec.job.name(), %next, "sleeping until next fire");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                spec.job.run_once().await;
            }
            changed = shutdown.changed() => {
                // A closed channel means the scheduler is gone; treat it
                // like a shutdown signal.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }
    debug!(job = spec.job.name(), "job loop exited");
}

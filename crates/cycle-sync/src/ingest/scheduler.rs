//! Fixed-interval job loop
//!
//! Jobs are initialised once, then run one after another on every tick. The
//! next tick is scheduled only after the whole round finished, so two rounds
//! never overlap.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Result, SyncError};

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before the first round.
    async fn init(&mut self) -> Result<()>;

    async fn run(&self, cancel: &CancellationToken) -> Result<()>;
}

pub struct PollScheduler {
    interval: Duration,
    jobs: Vec<Box<dyn Job>>,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Box::new(job));
        self
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Run until `cancel` fires. Fails only if a job cannot be initialised.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(SyncError::config("scheduler has no jobs"));
        }

        for job in &mut self.jobs {
            job.init().await?;
            info!(job = job.name(), "Job initialised");
        }

        info!(
            jobs = self.jobs.len(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            for job in &self.jobs {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = job.run(&cancel).await {
                    error!(job = job.name(), error = %e, fatal = e.is_fatal(), "Job failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {},
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

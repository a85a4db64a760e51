//! Scheduler driving the batch jobs
//!
//! Cron-triggered invocation of "evaluate all active rules now" and
//! "drain all due digests now". Job failures are logged and the loop
//! continues; cancellation means the next tick simply never starts.

mod cron;

pub use cron::CronSchedule;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::alerting::AlertEngine;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

/// Runs the evaluation and digest jobs on their cron schedules
pub struct Scheduler {
    engine: Arc<AlertEngine>,
    evaluate: CronSchedule,
    digest: CronSchedule,
}

impl Scheduler {
    /// Parse the configured cron expressions and build a scheduler
    pub fn from_config(engine: Arc<AlertEngine>, config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            engine,
            evaluate: CronSchedule::parse(&config.evaluate_cron)?,
            digest: CronSchedule::parse(&config.digest_cron)?,
        })
    }

    /// Run until the process is stopped
    pub async fn run(&self) -> Result<()> {
        info!("scheduler started");

        loop {
            let now = Utc::now();
            let next_evaluate = self
                .evaluate
                .next_after(now)
                .ok_or_else(|| Error::schedule("evaluation schedule never fires"))?;
            let next_digest = self
                .digest
                .next_after(now)
                .ok_or_else(|| Error::schedule("digest schedule never fires"))?;

            let next = next_evaluate.min(next_digest);
            debug!(next = %next, "sleeping until next job");

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if next_evaluate == next {
                if let Err(e) = self.engine.run_evaluation().await {
                    error!(error = %e, "evaluation tick failed");
                }
            }
            if next_digest == next {
                if let Err(e) = self.engine.run_digest().await {
                    error!(error = %e, "digest drain failed");
                }
            }
        }
    }
}

//! Background job scheduling

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::services::renamer::Renamer;

/// When a periodic job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    /// Six-field cron expression (with seconds)
    Cron(String),
    /// Fixed interval for periods a cron step can't express
    Every(Duration),
}

/// Schedule for a job running every `minutes` minutes
pub fn every_minutes(minutes: u64) -> JobSchedule {
    if (1..60).contains(&minutes) {
        JobSchedule::Cron(format!("0 */{} * * * *", minutes))
    } else {
        JobSchedule::Every(Duration::from_secs(minutes * 60))
    }
}

/// Schedule for a job running every `hours` hours
pub fn every_hours(hours: u64) -> JobSchedule {
    if (1..24).contains(&hours) {
        JobSchedule::Cron(format!("0 0 */{} * * *", hours))
    } else {
        JobSchedule::Every(Duration::from_secs(hours * 3600))
    }
}

fn renamer_job<F, Fut>(schedule: JobSchedule, renamer: Arc<Renamer>, run: F) -> anyhow::Result<Job>
where
    F: Fn(Arc<Renamer>) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let job = match schedule {
        JobSchedule::Cron(expression) => Job::new_async(expression.as_str(), move |_uuid, _l| {
            let renamer = renamer.clone();
            let run = run.clone();
            Box::pin(async move { run(renamer).await })
        })?,
        JobSchedule::Every(period) => Job::new_repeated_async(period, move |_uuid, _l| {
            let renamer = renamer.clone();
            let run = run.clone();
            Box::pin(async move { run(renamer).await })
        })?,
    };
    Ok(job)
}

/// Initialize and start the renamer jobs
///
/// Reconciliation runs every `run_every` minutes, a full organization pass
/// every `force_every` hours. A zero period (or a disabled renamer) skips
/// the job.
pub async fn start_scheduler(renamer: Arc<Renamer>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let config = renamer.config().clone();

    if config.enabled && config.run_every > 0 {
        let job = renamer_job(every_minutes(config.run_every), renamer.clone(), |renamer| async move {
            info!("Checking snatched releases");
            if let Err(e) = renamer.check_snatched().await {
                tracing::error!("Checking snatched releases failed: {}", e);
            }
        })?;
        scheduler.add(job).await?;
    }

    if config.enabled && config.force_every > 0 {
        let job = renamer_job(every_hours(config.force_every), renamer.clone(), |renamer| async move {
            info!("Running forced renamer scan");
            if let Err(e) = renamer.scan(None).await {
                tracing::error!("Renamer scan failed: {}", e);
            }
        })?;
        scheduler.add(job).await?;
    }

    scheduler.start().await?;

    info!(
        run_every = config.run_every,
        force_every = config.force_every,
        "Job scheduler started"
    );
    Ok(scheduler)
}

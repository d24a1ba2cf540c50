use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::clock::SystemClock;
use crate::core::config::AppSettings;
use crate::core::coordinator::JobRunner;
use crate::core::store::Store;
use crate::core::terminal::{GuideSection, print_info};

/// Run one cycle unless the previous one is still going. Returns whether a
/// cycle ran.
async fn run_tick(runner: &JobRunner, gate: &Mutex<()>, cancel: &CancellationToken) -> bool {
    let Ok(_running) = gate.try_lock() else {
        warn!("Previous cycle still running; skipping this tick");
        return false;
    };
    if cancel.is_cancelled() {
        return false;
    }
    match runner.run_all(cancel).await {
        Ok(summary) => info!(
            "Scheduled cycle done: {} file(s) staged, {} agent(s) failed",
            summary.files_staged(),
            summary.agents_failed()
        ),
        Err(e) => error!("Scheduled cycle failed: {:#}", e),
    }
    true
}

fn cycle_job(
    cron: &str,
    runner: Arc<JobRunner>,
    gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
) -> Result<Job> {
    Job::new_async(cron, move |_uuid, mut _l| {
        let runner = runner.clone();
        let gate = gate.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            run_tick(&runner, &gate, &cancel).await;
        })
    })
    .map_err(|e| anyhow::anyhow!("Invalid daemon.cron '{}': {:?}", cron, e))
}

/// Fire a cycle on every cron tick until Ctrl+C. The in-flight cycle stops
/// at the next agent boundary.
pub async fn run_daemon(settings: &AppSettings) -> Result<()> {
    let store = Store::open(&settings.database_path()).await?;
    let runner = Arc::new(JobRunner::from_settings(settings, store, Arc::new(SystemClock))?);
    let gate = Arc::new(Mutex::new(()));
    let cancel = CancellationToken::new();

    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;
    let job = cycle_job(&settings.daemon.cron, runner, gate.clone(), cancel.clone())?;
    scheduler.add(job).await.context("Failed to schedule cycle")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    GuideSection::new("Daemon")
        .status("Schedule", &settings.daemon.cron)
        .status("Database", &settings.database_path().display().to_string())
        .status("Share", &settings.share_root().display().to_string())
        .blank()
        .hint("Press Ctrl+C to stop.")
        .print();
    info!("Daemon started with schedule '{}'", settings.daemon.cron);

    tokio::signal::ctrl_c().await?;
    print_info("Stopping after the current agent...");
    cancel.cancel();
    let _idle = gate.lock().await;
    scheduler.shutdown().await.context("Failed to stop scheduler")?;
    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn runner() -> (tempfile::TempDir, Store, Arc<JobRunner>) {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::from_toml_str("", dir.path()).unwrap();
        let store = Store::open_in_memory().unwrap();
        let runner = JobRunner::from_settings(&settings, store.clone(), Arc::new(SystemClock)).unwrap();
        (dir, store, Arc::new(runner))
    }

    #[tokio::test]
    async fn tick_is_skipped_while_a_cycle_runs() {
        let (_dir, store, runner) = runner().await;
        let gate = Mutex::new(());
        let cancel = CancellationToken::new();

        let held = gate.lock().await;
        assert!(!run_tick(&runner, &gate, &cancel).await);
        assert!(store.job_status().await.unwrap().started.is_none());
        drop(held);

        assert!(run_tick(&runner, &gate, &cancel).await);
        assert!(store.job_status().await.unwrap().completed.is_some());
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let (_dir, _store, runner) = runner().await;
        let gate = Arc::new(Mutex::new(()));
        assert!(cycle_job("every five minutes", runner.clone(), gate.clone(), CancellationToken::new()).is_err());
        assert!(cycle_job("0 */5 * * * *", runner, gate, CancellationToken::new()).is_ok());
    }
}

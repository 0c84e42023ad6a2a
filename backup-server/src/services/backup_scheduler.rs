use crate::state::AppState;
use backup_engine::schedule::TriggerOutcome;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

/// Run the daily trigger once and publish the result.
pub async fn run_daily(state: &AppState) {
    match state.backups.run_daily_trigger().await {
        Ok(TriggerOutcome::Created(meta)) => {
            tracing::info!(backup_id = %meta.backup_id, records = meta.total_records, "Daily backup created");
            state.ui.broadcast(
                "backup:created",
                serde_json::json!({ "backupId": meta.backup_id, "origin": meta.origin }),
            );
        }
        Ok(TriggerOutcome::Skipped { existing_id }) => {
            tracing::debug!(backup_id = %existing_id, "Daily backup already present");
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "Daily backup failed");
        }
    }
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn schedule_daily(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled daily backup");
                run_daily(&state).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Daily backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

use crate::pipeline::DigestPipeline;
use crate::scheduler::DigestScheduler;
use crate::settings::{SettingsManager, DIGEST_TIME, TIMEZONE};
use crate::types::{DigestError, FeedbackEvent, Result};
use std::sync::Arc;
use tracing::{error, info};

/// Wires the pipeline to the daily scheduler and keeps the schedule in step
/// with the `digest_time` and `timezone` settings.
pub struct DigestService {
    settings: Arc<SettingsManager>,
    pipeline: Arc<DigestPipeline>,
    scheduler: DigestScheduler,
}

impl DigestService {
    /// Builds the scheduler from the current settings and starts it.
    pub async fn start(pipeline: Arc<DigestPipeline>) -> Result<Self> {
        let settings = pipeline.settings().clone();
        let timezone = setting(&settings, TIMEZONE).await?;
        let digest_time = setting(&settings, DIGEST_TIME).await?;

        let cycle_pipeline = pipeline.clone();
        let scheduler = DigestScheduler::new(&timezone, &digest_time, move || {
            let pipeline = cycle_pipeline.clone();
            async move {
                let report = pipeline.run_cycle().await?;
                info!(
                    "Scheduled digest delivered {} articles",
                    report.delivered.len()
                );
                Ok::<(), anyhow::Error>(())
            }
        })?;
        scheduler.start().await?;

        info!("Digest service started");
        Ok(Self {
            settings,
            pipeline,
            scheduler,
        })
    }

    /// Persists a setting. Time and timezone changes retime the scheduler
    /// right away; other keys are picked up by the next cycle.
    pub async fn update_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings.set(key, value).await?;

        match key {
            DIGEST_TIME => self.scheduler.update(value).await,
            TIMEZONE => self.scheduler.update_timezone(value).await,
            _ => Ok(()),
        }
    }

    pub async fn handle_feedback(&self, event: FeedbackEvent) -> Result<()> {
        self.pipeline.handle_feedback(event).await
    }

    pub fn scheduler(&self) -> &DigestScheduler {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &Arc<DigestPipeline> {
        &self.pipeline
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        info!("Digest service shut down");
    }
}

async fn setting(settings: &SettingsManager, key: &str) -> Result<String> {
    settings.get(key).await.ok_or_else(|| {
        error!("Setting {} missing at startup", key);
        DigestError::UnknownSetting(key.to_string())
    })
}

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::resolver::IntakeAnswers;
use crate::sections::SectionId;

use super::progress::{JobProgressBroadcaster, JobProgressTracker, JobStatus};
use super::store::{GenerationJob, JobStore};
use super::JobError;

/// Generates and persists one section on behalf of a job.
#[async_trait]
pub trait SectionTask: Send + Sync {
    /// `Err` carries an operator-facing message.
    async fn run_section(
        &self,
        funnel_id: &str,
        section: SectionId,
        intake: &IntakeAnswers,
    ) -> Result<(), String>;
}

/// How the sections of one job are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// All sections at once, no ordering.
    #[default]
    Parallel,
    /// One at a time, in the order given.
    Sequential,
}

/// Handle to a running job.
pub struct JobHandle {
    pub job_id: String,
    join: JoinHandle<Result<GenerationJob, JobError>>,
}

impl JobHandle {
    /// Waits for the job to finish and returns its final state.
    pub async fn wait(self) -> Result<GenerationJob, JobError> {
        self.join
            .await
            .map_err(|e| JobError::TaskFailed(e.to_string()))?
    }
}

#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    broadcaster: JobProgressBroadcaster,
    task: Arc<dyn SectionTask>,
}

impl JobRunner {
    pub fn new(store: JobStore, broadcaster: JobProgressBroadcaster, task: Arc<dyn SectionTask>) -> Self {
        Self {
            store,
            broadcaster,
            task,
        }
    }

    /// Creates a queued job and starts it in the background. Duplicate
    /// sections are generated once.
    pub fn start(
        &self,
        funnel_id: &str,
        sections: &[SectionId],
        mode: BatchMode,
        intake: IntakeAnswers,
    ) -> Result<JobHandle, JobError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| JobError::NoRuntime)?;

        let mut unique: Vec<SectionId> = Vec::with_capacity(sections.len());
        for section in sections {
            if !unique.contains(section) {
                unique.push(*section);
            }
        }
        if unique.is_empty() {
            return Err(JobError::EmptyBatch);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        self.store.create(&job_id, funnel_id, &unique)?;
        let tracker = self.broadcaster.start_job(&job_id, funnel_id);
        info!(job_id = %job_id, funnel_id = %funnel_id, sections = unique.len(), "Job queued");

        let runner = self.clone();
        let funnel = funnel_id.to_string();
        let span = info_span!("generation_job", job_id = %job_id, funnel_id = %funnel_id, mode = ?mode);
        let join = runtime.spawn(
            async move {
                let result = runner.execute(&tracker, &funnel, &unique, mode, &intake).await;
                if let Err(e) = &result {
                    error!("Job aborted: {}", e);
                    let message = e.to_string();
                    if let Err(e) = runner
                        .store
                        .set_status(tracker.job_id(), JobStatus::Failed, Some(&message))
                    {
                        error!("Could not mark job as failed: {}", e);
                    }
                    tracker.failed(&message);
                }
                result
            }
            .instrument(span),
        );

        Ok(JobHandle { job_id, join })
    }

    async fn execute(
        &self,
        tracker: &JobProgressTracker,
        funnel_id: &str,
        sections: &[SectionId],
        mode: BatchMode,
        intake: &IntakeAnswers,
    ) -> Result<GenerationJob, JobError> {
        let job_id = tracker.job_id();
        self.store.set_status(job_id, JobStatus::Processing, None)?;
        tracker.update(JobStatus::Processing, 0, "Generating sections");

        match mode {
            BatchMode::Parallel => {
                let runs = sections
                    .iter()
                    .map(|section| self.run_one(tracker, funnel_id, *section, intake));
                for result in join_all(runs).await {
                    result?;
                }
            }
            BatchMode::Sequential => {
                for section in sections {
                    self.run_one(tracker, funnel_id, *section, intake).await?;
                }
            }
        }

        let job = self.find(job_id)?;
        if job.sections_failed.is_empty() {
            self.store.set_status(job_id, JobStatus::Completed, None)?;
            tracker.completed();
            info!("Job completed");
        } else {
            let failed: Vec<&str> = job.sections_failed.iter().map(SectionId::as_str).collect();
            let message = format!(
                "{} of {} sections failed: {}",
                failed.len(),
                job.sections_to_generate.len(),
                failed.join(", ")
            );
            self.store.set_status(job_id, JobStatus::Failed, Some(&message))?;
            tracker.failed(&message);
            warn!("{}", message);
        }

        self.find(job_id)
    }

    async fn run_one(
        &self,
        tracker: &JobProgressTracker,
        funnel_id: &str,
        section: SectionId,
        intake: &IntakeAnswers,
    ) -> Result<(), JobError> {
        let result = self.task.run_section(funnel_id, section, intake).await;
        let error = result.as_ref().err().map(String::as_str);
        if let Some(e) = error {
            warn!(section = %section, "Section failed: {}", e);
        }

        let job = self.store.record_section(tracker.job_id(), section, result.is_ok())?;
        tracker.section_finished(section, result.is_ok(), job.progress_percentage, error);
        Ok(())
    }

    fn find(&self, job_id: &str) -> Result<GenerationJob, JobError> {
        self.store
            .find(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }
}

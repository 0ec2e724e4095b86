//! Job progress broadcaster for real-time regeneration status streaming.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::sections::SectionId;

/// Status of a regeneration job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub funnel_id: String,
    pub status: JobStatus,
    /// Section that just finished, if the event reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<SectionId>,
    /// Whether `section` succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_succeeded: Option<bool>,
    /// Percentage of sections finished, 0..=100.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, funnel_id: &str, status: JobStatus, progress: u8, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            funnel_id: funnel_id.to_string(),
            status,
            section: None,
            section_succeeded: None,
            progress,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Event for a finished section.
    pub fn section_finished(
        job_id: &str,
        funnel_id: &str,
        section: SectionId,
        succeeded: bool,
        progress: u8,
        error: Option<&str>,
    ) -> Self {
        let message = if succeeded {
            format!("Generated {section}")
        } else {
            format!("Failed to generate {section}")
        };
        Self {
            section: Some(section),
            section_succeeded: Some(succeeded),
            error: error.map(str::to_string),
            ..Self::new(job_id, funnel_id, JobStatus::Processing, progress, &message)
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job and announces it as queued.
    pub fn start_job(&self, job_id: &str, funnel_id: &str) -> JobProgressTracker {
        let tracker = JobProgressTracker {
            job_id: job_id.to_string(),
            funnel_id: funnel_id.to_string(),
            sender: Arc::clone(&self.sender),
        };
        tracker.update(JobStatus::Queued, 0, "Job queued");
        tracker
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    funnel_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update(&self, status: JobStatus, progress: u8, message: &str) {
        let event = JobProgressEvent::new(&self.job_id, &self.funnel_id, status, progress, message);
        let _ = self.sender.send(event);
    }

    pub fn section_finished(&self, section: SectionId, succeeded: bool, progress: u8, error: Option<&str>) {
        let event = JobProgressEvent::section_finished(
            &self.job_id,
            &self.funnel_id,
            section,
            succeeded,
            progress,
            error,
        );
        let _ = self.sender.send(event);
    }

    pub fn completed(&self) {
        self.update(JobStatus::Completed, 100, "All sections generated");
    }

    pub fn failed(&self, error: &str) {
        let mut event =
            JobProgressEvent::new(&self.job_id, &self.funnel_id, JobStatus::Failed, 100, "Job finished with failures");
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }
}

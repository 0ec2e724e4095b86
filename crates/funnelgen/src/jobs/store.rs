//! Job store with persistent database storage.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::job_repo::{self, JobRow, SectionOutcomeKind};
use crate::db::Database;
use crate::sections::SectionId;

use super::progress::JobStatus;
use super::JobError;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_status(s: &str, job_id: &str) -> JobStatus {
    JobStatus::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown job status '{}' for job {}, defaulting to Processing",
            s,
            job_id
        );
        JobStatus::Processing
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_sections(keys: Vec<String>, job_id: &str) -> Vec<SectionId> {
    keys.into_iter()
        .filter_map(|key| {
            let parsed = SectionId::parse(&key);
            if parsed.is_none() {
                log::warn!("Job {} references unknown section '{}'", job_id, key);
            }
            parsed
        })
        .collect()
}

// ─── GenerationJob ──────────────────────────────────────────────────────────

/// A multi-section regeneration job as stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub job_id: String,
    pub funnel_id: String,
    pub sections_to_generate: Vec<SectionId>,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub sections_completed: Vec<SectionId>,
    pub sections_failed: Vec<SectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn from_job_row(row: &JobRow) -> Result<Self, JobError> {
        Ok(Self {
            job_id: row.id.clone(),
            funnel_id: row.funnel_id.clone(),
            sections_to_generate: parse_sections(row.sections_to_generate()?, &row.id),
            status: parse_status(&row.status, &row.id),
            progress_percentage: row.progress_percentage.clamp(0, 100) as u8,
            sections_completed: parse_sections(row.sections_completed()?, &row.id),
            sections_failed: parse_sections(row.sections_failed()?, &row.id),
            error: row.error.clone(),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Reads and writes jobs in the `generation_jobs` table.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find(&self, job_id: &str) -> Result<Option<GenerationJob>, JobError> {
        job_repo::find_by_id(&self.db, job_id)?
            .as_ref()
            .map(GenerationJob::from_job_row)
            .transpose()
    }

    /// Jobs of a funnel, newest first.
    pub fn list_for_funnel(
        &self,
        funnel_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<GenerationJob>, JobError> {
        job_repo::list_for_funnel(&self.db, funnel_id, limit)?
            .iter()
            .map(GenerationJob::from_job_row)
            .collect()
    }

    pub(crate) fn create(
        &self,
        job_id: &str,
        funnel_id: &str,
        sections: &[SectionId],
    ) -> Result<GenerationJob, JobError> {
        let keys: Vec<String> = sections.iter().map(|s| s.as_str().to_string()).collect();
        let row = job_repo::insert(&self.db, job_id, funnel_id, &keys)?;
        GenerationJob::from_job_row(&row)
    }

    pub(crate) fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobError> {
        job_repo::update_status(&self.db, job_id, status.as_str(), error)?;
        Ok(())
    }

    /// Records a finished section and returns the updated job.
    pub(crate) fn record_section(
        &self,
        job_id: &str,
        section: SectionId,
        succeeded: bool,
    ) -> Result<GenerationJob, JobError> {
        let outcome = if succeeded {
            SectionOutcomeKind::Completed
        } else {
            SectionOutcomeKind::Failed
        };
        let row = job_repo::append_section(&self.db, job_id, section.as_str(), outcome)?;
        GenerationJob::from_job_row(&row)
    }
}

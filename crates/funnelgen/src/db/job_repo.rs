//! Job repository: CRUD operations for the `generation_jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

/// A raw job row from the database. List columns hold JSON arrays of
/// section keys.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub funnel_id: String,
    pub sections_to_generate: String,
    pub status: String,
    pub progress_percentage: i64,
    pub sections_completed: String,
    pub sections_failed: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            funnel_id: row.get("funnel_id")?,
            sections_to_generate: row.get("sections_to_generate")?,
            status: row.get("status")?,
            progress_percentage: row.get("progress_percentage")?,
            sections_completed: row.get("sections_completed")?,
            sections_failed: row.get("sections_failed")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn decode_list(&self, column: &'static str, raw: &str) -> Result<Vec<String>, DatabaseError> {
        serde_json::from_str(raw).map_err(|source| DatabaseError::CorruptColumn {
            id: self.id.clone(),
            column,
            source,
        })
    }

    pub fn sections_to_generate(&self) -> Result<Vec<String>, DatabaseError> {
        self.decode_list("sections_to_generate", &self.sections_to_generate)
    }

    pub fn sections_completed(&self) -> Result<Vec<String>, DatabaseError> {
        self.decode_list("sections_completed", &self.sections_completed)
    }

    pub fn sections_failed(&self) -> Result<Vec<String>, DatabaseError> {
        self.decode_list("sections_failed", &self.sections_failed)
    }
}

/// Which list a finished section is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOutcomeKind {
    Completed,
    Failed,
}

/// Inserts a new job in `queued` status.
pub fn insert(
    db: &Database,
    id: &str,
    funnel_id: &str,
    sections: &[String],
) -> Result<JobRow, DatabaseError> {
    let sections_json = serde_json::to_string(sections).map_err(|source| {
        DatabaseError::CorruptColumn {
            id: id.to_string(),
            column: "sections_to_generate",
            source,
        }
    })?;
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO generation_jobs (id, funnel_id, sections_to_generate, status,
             progress_percentage, sections_completed, sections_failed, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'queued', 0, '[]', '[]', ?4, ?4)",
            params![id, funnel_id, sections_json, now],
        )?;
        Ok(())
    })?;

    find_by_id(db, id)?.ok_or_else(|| {
        DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM generation_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists the jobs of a funnel, newest first.
pub fn list_for_funnel(
    db: &Database,
    funnel_id: &str,
    limit: Option<u64>,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM generation_jobs WHERE funnel_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let limit = limit.unwrap_or(100) as i64;
        let rows = stmt
            .query_map(params![funnel_id, limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates only the status (and completion time for terminal statuses).
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let completed_at = matches!(status, "completed" | "failed").then(|| now.clone());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE generation_jobs SET status = ?2, error = COALESCE(?3, error),
             completed_at = COALESCE(?4, completed_at), updated_at = ?5
             WHERE id = ?1",
            params![id, status, error, completed_at, now],
        )?;
        Ok(())
    })
}

/// Appends a finished section to the completed or failed list and
/// recomputes the progress percentage, atomically.
pub fn append_section(
    db: &Database,
    id: &str,
    section_id: &str,
    outcome: SectionOutcomeKind,
) -> Result<JobRow, DatabaseError> {
    db.with_transaction(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM generation_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?
            .ok_or(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;

        let total = job.sections_to_generate()?.len();
        let mut completed = job.sections_completed()?;
        let mut failed = job.sections_failed()?;
        match outcome {
            SectionOutcomeKind::Completed => completed.push(section_id.to_string()),
            SectionOutcomeKind::Failed => failed.push(section_id.to_string()),
        }
        let progress = progress_percentage(completed.len() + failed.len(), total);

        let encode = |column: &'static str, list: &[String]| {
            serde_json::to_string(list).map_err(|source| DatabaseError::CorruptColumn {
                id: id.to_string(),
                column,
                source,
            })
        };
        let completed_json = encode("sections_completed", &completed)?;
        let failed_json = encode("sections_failed", &failed)?;
        let now = now_timestamp();

        conn.execute(
            "UPDATE generation_jobs SET sections_completed = ?2, sections_failed = ?3,
             progress_percentage = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, completed_json, failed_json, progress, now],
        )?;

        Ok(JobRow {
            sections_completed: completed_json,
            sections_failed: failed_json,
            progress_percentage: progress,
            updated_at: now,
            ..job
        })
    })
}

fn progress_percentage(done: usize, total: usize) -> i64 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sections(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let job = insert(&db, "job-1", "funnel-1", &sections(&["emails", "sms"])).unwrap();
        assert_eq!(job.status, "queued");
        assert_eq!(job.progress_percentage, 0);
        assert_eq!(job.sections_to_generate().unwrap(), vec!["emails", "sms"]);

        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_append_section_updates_progress() {
        let db = test_db();
        insert(&db, "job-1", "funnel-1", &sections(&["a", "b", "c", "d"])).unwrap();

        let job = append_section(&db, "job-1", "a", SectionOutcomeKind::Completed).unwrap();
        assert_eq!(job.progress_percentage, 25);

        append_section(&db, "job-1", "b", SectionOutcomeKind::Failed).unwrap();
        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.progress_percentage, 50);
        assert_eq!(job.sections_completed().unwrap(), vec!["a"]);
        assert_eq!(job.sections_failed().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_append_to_missing_job_fails() {
        let db = test_db();
        assert!(append_section(&db, "ghost", "a", SectionOutcomeKind::Completed).is_err());
    }

    #[test]
    fn test_update_status_sets_completion_time() {
        let db = test_db();
        insert(&db, "job-1", "funnel-1", &sections(&["a"])).unwrap();

        update_status(&db, "job-1", "processing", None).unwrap();
        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.status, "processing");
        assert!(job.completed_at.is_none());

        update_status(&db, "job-1", "failed", Some("1 section failed")).unwrap();
        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert!(job.completed_at.is_some());
        assert_eq!(job.error.as_deref(), Some("1 section failed"));
    }

    #[test]
    fn test_list_for_funnel() {
        let db = test_db();
        insert(&db, "job-1", "funnel-1", &sections(&["a"])).unwrap();
        insert(&db, "job-2", "funnel-1", &sections(&["b"])).unwrap();
        insert(&db, "job-3", "funnel-2", &sections(&["c"])).unwrap();

        let jobs = list_for_funnel(&db, "funnel-1", None).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.funnel_id == "funnel-1"));
        assert_eq!(list_for_funnel(&db, "funnel-1", Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(progress_percentage(0, 3), 0);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(0, 0), 100);
    }
}

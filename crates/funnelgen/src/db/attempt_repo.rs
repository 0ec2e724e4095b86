//! Generation attempt log: one row per `generate_section` call.
//!
//! Failed generations are only ever recorded here, so the current content
//! version of a section is never replaced by a failure.

use rusqlite::{params, Row};

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub id: String,
    pub funnel_id: String,
    pub section_id: String,
    pub status: String,
    pub error: Option<String>,
    pub failed_chunks: String,
    pub validation_issues: String,
    pub content_version: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl AttemptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            funnel_id: row.get("funnel_id")?,
            section_id: row.get("section_id")?,
            status: row.get("status")?,
            error: row.get("error")?,
            failed_chunks: row.get("failed_chunks")?,
            validation_issues: row.get("validation_issues")?,
            content_version: row.get("content_version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Final outcome of an attempt.
#[derive(Debug, Clone, Default)]
pub struct AttemptResult<'a> {
    pub status: &'a str,
    pub error: Option<&'a str>,
    pub failed_chunks: &'a [String],
    pub validation_issues: &'a [String],
    pub content_version: Option<i64>,
}

/// Records the start of an attempt in `generating` status. Returns its ID.
pub fn start(db: &Database, funnel_id: &str, section_id: &str) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO generation_attempts (id, funnel_id, section_id, status, created_at,
             updated_at) VALUES (?1, ?2, ?3, 'generating', ?4, ?4)",
            params![id, funnel_id, section_id, now],
        )?;
        Ok(())
    })?;
    Ok(id)
}

/// Stores the outcome of an attempt.
pub fn finish(db: &Database, id: &str, result: &AttemptResult<'_>) -> Result<(), DatabaseError> {
    let encode = |column: &'static str, list: &[String]| {
        serde_json::to_string(list).map_err(|source| DatabaseError::CorruptColumn {
            id: id.to_string(),
            column,
            source,
        })
    };
    let failed_chunks = encode("failed_chunks", result.failed_chunks)?;
    let issues = encode("validation_issues", result.validation_issues)?;

    db.with_conn(|conn| {
        conn.execute(
            "UPDATE generation_attempts SET status = ?2, error = ?3, failed_chunks = ?4,
             validation_issues = ?5, content_version = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                id,
                result.status,
                result.error,
                failed_chunks,
                issues,
                result.content_version,
                now_timestamp(),
            ],
        )?;
        Ok(())
    })
}

/// Lists the attempts for a section, newest first.
pub fn list_for_section(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
) -> Result<Vec<AttemptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM generation_attempts WHERE funnel_id = ?1 AND section_id = ?2
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![funnel_id, section_id], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_finish() {
        let db = Database::open_in_memory().unwrap();
        let id = start(&db, "funnel-1", "offer").unwrap();

        let rows = list_for_section(&db, "funnel-1", "offer").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "generating");

        let failed = vec!["emails 5-8".to_string()];
        finish(
            &db,
            &id,
            &AttemptResult {
                status: "generated",
                failed_chunks: &failed,
                content_version: Some(3),
                ..Default::default()
            },
        )
        .unwrap();

        let rows = list_for_section(&db, "funnel-1", "offer").unwrap();
        assert_eq!(rows[0].status, "generated");
        assert_eq!(rows[0].content_version, Some(3));
        assert_eq!(rows[0].failed_chunks, r#"["emails 5-8"]"#);
        assert!(rows[0].error.is_none());
    }

    #[test]
    fn test_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = start(&db, "funnel-1", "bio").unwrap();
        let second = start(&db, "funnel-1", "bio").unwrap();
        let rows = list_for_section(&db, "funnel-1", "bio").unwrap();
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[1].id, first);
    }
}

//! Section repository: versioned rows of the `section_contents` table.
//!
//! Rows are never updated in place except for the `is_current_version`
//! flag and the review `status`. New content always means a new row.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

/// A raw section version row from the database.
#[derive(Debug, Clone)]
pub struct SectionRow {
    pub id: String,
    pub funnel_id: String,
    pub section_id: String,
    pub numeric_key: i64,
    pub phase: i64,
    pub content: String,
    pub status: String,
    pub version: i64,
    pub is_current_version: bool,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            funnel_id: row.get("funnel_id")?,
            section_id: row.get("section_id")?,
            numeric_key: row.get("numeric_key")?,
            phase: row.get("phase")?,
            content: row.get("content")?,
            status: row.get("status")?,
            version: row.get("version")?,
            is_current_version: row.get("is_current_version")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Content of a section version about to be written.
#[derive(Debug, Clone)]
pub struct NewSectionVersion {
    pub funnel_id: String,
    pub section_id: String,
    pub numeric_key: i64,
    pub phase: i64,
    pub content: String,
    pub status: String,
    pub metadata: Option<String>,
}

/// Finds the current version of a section.
pub fn find_current(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
) -> Result<Option<SectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM section_contents
                 WHERE funnel_id = ?1 AND section_id = ?2 AND is_current_version = 1",
                params![funnel_id, section_id],
                SectionRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the highest version of a section, current or not.
pub fn find_latest(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
) -> Result<Option<SectionRow>, DatabaseError> {
    db.with_conn(|conn| latest_in(conn, funnel_id, section_id))
}

fn latest_in(
    conn: &Connection,
    funnel_id: &str,
    section_id: &str,
) -> Result<Option<SectionRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM section_contents
             WHERE funnel_id = ?1 AND section_id = ?2
             ORDER BY version DESC LIMIT 1",
            params![funnel_id, section_id],
            SectionRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists every version of a section, oldest first.
pub fn list_history(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
) -> Result<Vec<SectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM section_contents
             WHERE funnel_id = ?1 AND section_id = ?2
             ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map(params![funnel_id, section_id], SectionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists the current version of every section of a funnel, in generation order.
pub fn list_current_for_funnel(
    db: &Database,
    funnel_id: &str,
) -> Result<Vec<SectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM section_contents
             WHERE funnel_id = ?1 AND is_current_version = 1
             ORDER BY numeric_key ASC",
        )?;
        let rows = stmt
            .query_map(params![funnel_id], SectionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Flips every current row of the section to not-current and inserts
/// `version` as the new current row, in one transaction.
///
/// Fails with a unique violation when another writer already inserted
/// `version`; the transaction is rolled back and nothing changes.
pub fn insert_version(
    db: &Database,
    new: &NewSectionVersion,
    version: i64,
) -> Result<SectionRow, DatabaseError> {
    db.with_transaction(|conn| {
        let now = now_timestamp();
        conn.execute(
            "UPDATE section_contents SET is_current_version = 0, updated_at = ?3
             WHERE funnel_id = ?1 AND section_id = ?2 AND is_current_version = 1",
            params![new.funnel_id, new.section_id, now],
        )?;

        let row = SectionRow {
            id: uuid::Uuid::new_v4().to_string(),
            funnel_id: new.funnel_id.clone(),
            section_id: new.section_id.clone(),
            numeric_key: new.numeric_key,
            phase: new.phase,
            content: new.content.clone(),
            status: new.status.clone(),
            version,
            is_current_version: true,
            metadata: new.metadata.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO section_contents (id, funnel_id, section_id, numeric_key, phase,
             content, status, version, is_current_version, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11)",
            params![
                row.id,
                row.funnel_id,
                row.section_id,
                row.numeric_key,
                row.phase,
                row.content,
                row.status,
                row.version,
                row.metadata,
                row.created_at,
                row.updated_at,
            ],
        )?;

        Ok(row)
    })
}

/// Updates only the review status of the current version.
/// Returns false when the section has no current version.
pub fn update_current_status(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
    status: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE section_contents SET status = ?3, updated_at = ?4
             WHERE funnel_id = ?1 AND section_id = ?2 AND is_current_version = 1",
            params![funnel_id, section_id, status, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn new_offer(content: &str) -> NewSectionVersion {
        NewSectionVersion {
            funnel_id: "funnel-1".to_string(),
            section_id: "offer".to_string(),
            numeric_key: 4,
            phase: 1,
            content: content.to_string(),
            status: "generated".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_insert_and_find_current() {
        let db = test_db();
        insert_version(&db, &new_offer(r#"{"offerName":"Acme"}"#), 1).unwrap();

        let found = find_current(&db, "funnel-1", "offer").unwrap().unwrap();
        assert_eq!(found.version, 1);
        assert!(found.is_current_version);
        assert_eq!(found.content, r#"{"offerName":"Acme"}"#);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_current(&db, "funnel-1", "offer").unwrap().is_none());
        assert!(find_latest(&db, "funnel-1", "offer").unwrap().is_none());
    }

    #[test]
    fn test_new_version_flips_previous() {
        let db = test_db();
        insert_version(&db, &new_offer("{}"), 1).unwrap();
        insert_version(&db, &new_offer(r#"{"a":1}"#), 2).unwrap();

        let history = list_history(&db, "funnel-1", "offer").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_current_version);
        assert!(history[1].is_current_version);
        assert_eq!(find_latest(&db, "funnel-1", "offer").unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_duplicate_version_rolls_back() {
        let db = test_db();
        insert_version(&db, &new_offer("{}"), 1).unwrap();
        let err = insert_version(&db, &new_offer("{}"), 1).unwrap_err();
        assert!(err.is_unique_violation());

        // The flip was rolled back with the failed insert.
        let current = find_current(&db, "funnel-1", "offer").unwrap().unwrap();
        assert_eq!(current.version, 1);
    }

    #[test]
    fn test_list_current_for_funnel_ordered() {
        let db = test_db();
        insert_version(&db, &new_offer("{}"), 1).unwrap();
        let mut client = new_offer("{}");
        client.section_id = "idealClient".to_string();
        client.numeric_key = 1;
        insert_version(&db, &client, 1).unwrap();

        let rows = list_current_for_funnel(&db, "funnel-1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.section_id.as_str()).collect();
        assert_eq!(ids, vec!["idealClient", "offer"]);
    }

    #[test]
    fn test_update_current_status() {
        let db = test_db();
        assert!(!update_current_status(&db, "funnel-1", "offer", "approved").unwrap());
        insert_version(&db, &new_offer("{}"), 1).unwrap();
        assert!(update_current_status(&db, "funnel-1", "offer", "approved").unwrap());
        let current = find_current(&db, "funnel-1", "offer").unwrap().unwrap();
        assert_eq!(current.status, "approved");
    }
}

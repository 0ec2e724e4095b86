//! Field repository: versioned rows of the `field_values` table.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

/// A raw field version row from the database.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub id: String,
    pub funnel_id: String,
    pub section_id: String,
    pub field_id: String,
    /// Serialized value; plain text when `value_type` is `string`,
    /// JSON otherwise.
    pub value: String,
    pub value_type: String,
    pub is_approved: bool,
    pub version: i64,
    pub is_current_version: bool,
    pub display_order: i64,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FieldRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            funnel_id: row.get("funnel_id")?,
            section_id: row.get("section_id")?,
            field_id: row.get("field_id")?,
            value: row.get("value")?,
            value_type: row.get("value_type")?,
            is_approved: row.get("is_approved")?,
            version: row.get("version")?,
            is_current_version: row.get("is_current_version")?,
            display_order: row.get("display_order")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A field version about to be written.
#[derive(Debug, Clone)]
pub struct NewFieldVersion {
    pub funnel_id: String,
    pub section_id: String,
    pub field_id: String,
    pub value: String,
    pub value_type: String,
    pub display_order: i64,
    pub metadata: Option<String>,
}

/// Finds the current version of a field.
pub fn find_current(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
    field_id: &str,
) -> Result<Option<FieldRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM field_values
                 WHERE funnel_id = ?1 AND section_id = ?2 AND field_id = ?3
                 AND is_current_version = 1",
                params![funnel_id, section_id, field_id],
                FieldRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the highest version of a field, current or not.
pub fn find_latest(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
    field_id: &str,
) -> Result<Option<FieldRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM field_values
                 WHERE funnel_id = ?1 AND section_id = ?2 AND field_id = ?3
                 ORDER BY version DESC LIMIT 1",
                params![funnel_id, section_id, field_id],
                FieldRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists the current fields of one section, in display order.
pub fn list_current_for_section(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
) -> Result<Vec<FieldRow>, DatabaseError> {
    list_current_in_sections(db, funnel_id, &[section_id])
}

/// Lists the current fields of every listed section.
pub fn list_current_in_sections(
    db: &Database,
    funnel_id: &str,
    section_ids: &[&str],
) -> Result<Vec<FieldRow>, DatabaseError> {
    if section_ids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..section_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT * FROM field_values
             WHERE funnel_id = ?1 AND is_current_version = 1 AND section_id IN ({})
             ORDER BY section_id ASC, display_order ASC, field_id ASC",
            placeholders.join(", ")
        );

        let values = std::iter::once(funnel_id).chain(section_ids.iter().copied());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), FieldRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every version of a field, oldest first.
pub fn list_history(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
    field_id: &str,
) -> Result<Vec<FieldRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM field_values
             WHERE funnel_id = ?1 AND section_id = ?2 AND field_id = ?3
             ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map(params![funnel_id, section_id, field_id], FieldRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Flips the current row of the field (if any) and inserts `version` as
/// the new current, unapproved row in one transaction.
///
/// Fails with a unique violation when another writer already inserted
/// `version`; the transaction is rolled back and nothing changes.
pub fn insert_version(
    db: &Database,
    new: &NewFieldVersion,
    version: i64,
) -> Result<FieldRow, DatabaseError> {
    db.with_transaction(|conn| {
        let now = now_timestamp();
        conn.execute(
            "UPDATE field_values SET is_current_version = 0, updated_at = ?4
             WHERE funnel_id = ?1 AND section_id = ?2 AND field_id = ?3
             AND is_current_version = 1",
            params![new.funnel_id, new.section_id, new.field_id, now],
        )?;

        let row = FieldRow {
            id: uuid::Uuid::new_v4().to_string(),
            funnel_id: new.funnel_id.clone(),
            section_id: new.section_id.clone(),
            field_id: new.field_id.clone(),
            value: new.value.clone(),
            value_type: new.value_type.clone(),
            is_approved: false,
            version,
            is_current_version: true,
            display_order: new.display_order,
            metadata: new.metadata.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO field_values (id, funnel_id, section_id, field_id, value, value_type,
             is_approved, version, is_current_version, display_order, metadata, created_at,
             updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 1, ?8, ?9, ?10, ?11)",
            params![
                row.id,
                row.funnel_id,
                row.section_id,
                row.field_id,
                row.value,
                row.value_type,
                row.version,
                row.display_order,
                row.metadata,
                row.created_at,
                row.updated_at,
            ],
        )?;

        Ok(row)
    })
}

/// Sets the approval flag on the current version of a field.
/// Returns false when the field has no current version.
pub fn set_current_approved(
    db: &Database,
    funnel_id: &str,
    section_id: &str,
    field_id: &str,
    approved: bool,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE field_values SET is_approved = ?4, updated_at = ?5
             WHERE funnel_id = ?1 AND section_id = ?2 AND field_id = ?3
             AND is_current_version = 1",
            params![funnel_id, section_id, field_id, approved, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

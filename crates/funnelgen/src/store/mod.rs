//! Versioned section and field store.
//!
//! Every write appends a new immutable version and flips the previous one's
//! current flag. Concurrent writers are detected through the uniqueness
//! constraints on version numbers and retried against the latest version
//! (optimistic concurrency, no locks held between read and write).
//!
//! All writes go through two read-modify-write primitives,
//! [`VersionedStore::modify_section`] and [`VersionedStore::modify_field`]:
//! the caller's closure is re-run against the latest stored value on every
//! retry, so a losing writer is re-applied on top of the winner instead of
//! being dropped.

mod error;
pub(crate) mod value;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::field_repo::{self, FieldRow, NewFieldVersion};
use crate::db::section_repo::{self, NewSectionVersion, SectionRow};
use crate::db::Database;
use crate::sections::{SectionId, SectionStatus};

pub use error::StoreError;

/// Default bound on optimistic-concurrency retries per write.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Current or historical version of a section document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSection {
    pub funnel_id: String,
    pub section: SectionId,
    pub content: Value,
    pub status: SectionStatus,
    pub version: i64,
    pub is_current_version: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Current or historical version of a single field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredField {
    pub funnel_id: String,
    pub section: SectionId,
    pub field_id: String,
    pub value: Value,
    pub is_approved: bool,
    pub version: i64,
    pub is_current_version: bool,
    pub display_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Result of a field write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldWrite {
    pub section: SectionId,
    /// The path the caller wrote (may be dotted).
    pub path: String,
    /// The stored field row that received the new version. For dotted
    /// paths this is the top-level parent.
    pub field_id: String,
    pub version: i64,
    /// Value at `path` before the write.
    pub previous: Option<Value>,
    /// Value at `path` after the write.
    pub value: Value,
}

/// A new section version produced by a [`VersionedStore::modify_section`]
/// closure.
#[derive(Debug, Clone)]
pub struct SectionUpdate {
    pub content: Value,
    pub status: SectionStatus,
    pub metadata: Option<Value>,
}

/// Optional knobs for a field write.
#[derive(Debug, Clone, Default)]
pub struct FieldWriteOptions {
    /// Display order for a brand-new field. Existing fields keep theirs.
    pub display_order: Option<i64>,
}

/// New value produced by a [`VersionedStore::modify_field`] closure.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub value: Value,
    /// Entry appended to `metadata.propagations` of the new version.
    pub provenance: Option<Value>,
}

impl FieldChange {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, entry: Value) -> Self {
        self.provenance = Some(entry);
        self
    }
}

#[derive(Clone)]
pub struct VersionedStore {
    db: Database,
    max_attempts: u32,
    conflict_backoff: Duration,
}

impl VersionedStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_attempts: DEFAULT_MAX_CONFLICT_RETRIES,
            conflict_backoff: Duration::from_millis(2),
        }
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, conflict_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.conflict_backoff = conflict_backoff;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn current_section(
        &self,
        funnel_id: &str,
        section: SectionId,
    ) -> Result<Option<StoredSection>, StoreError> {
        section_repo::find_current(&self.db, funnel_id, section.as_str())?
            .map(|row| section_from_row(&row))
            .transpose()
    }

    pub fn section_history(
        &self,
        funnel_id: &str,
        section: SectionId,
    ) -> Result<Vec<StoredSection>, StoreError> {
        section_repo::list_history(&self.db, funnel_id, section.as_str())?
            .iter()
            .map(section_from_row)
            .collect()
    }

    /// Current versions of every section of a funnel. Rows for sections
    /// this build does not know are skipped.
    pub fn current_sections(&self, funnel_id: &str) -> Result<Vec<StoredSection>, StoreError> {
        let mut sections = Vec::new();
        for row in section_repo::list_current_for_funnel(&self.db, funnel_id)? {
            if SectionId::parse(&row.section_id).is_none() {
                log::warn!("Skipping unknown section '{}' in funnel {}", row.section_id, funnel_id);
                continue;
            }
            sections.push(section_from_row(&row)?);
        }
        Ok(sections)
    }

    pub fn current_field(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
    ) -> Result<Option<StoredField>, StoreError> {
        field_repo::find_current(&self.db, funnel_id, section.as_str(), field_id)?
            .map(|row| field_from_row(&row))
            .transpose()
    }

    pub fn current_fields(
        &self,
        funnel_id: &str,
        section: SectionId,
    ) -> Result<Vec<StoredField>, StoreError> {
        self.current_fields_in(funnel_id, &[section])
    }

    pub fn current_fields_in(
        &self,
        funnel_id: &str,
        sections: &[SectionId],
    ) -> Result<Vec<StoredField>, StoreError> {
        let keys: Vec<&str> = sections.iter().map(SectionId::as_str).collect();
        field_repo::list_current_in_sections(&self.db, funnel_id, &keys)?
            .iter()
            .map(field_from_row)
            .collect()
    }

    pub fn field_history(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
    ) -> Result<Vec<StoredField>, StoreError> {
        field_repo::list_history(&self.db, funnel_id, section.as_str(), field_id)?
            .iter()
            .map(field_from_row)
            .collect()
    }

    // ─── Section writes ─────────────────────────────────────────────────────

    /// Appends a new current version of a section document.
    pub fn write_section(
        &self,
        funnel_id: &str,
        section: SectionId,
        content: &Value,
        status: SectionStatus,
    ) -> Result<StoredSection, StoreError> {
        let written = self.modify_section(funnel_id, section, |current| {
            Ok(Some(SectionUpdate {
                content: content.clone(),
                status,
                metadata: current.and_then(|s| s.metadata.clone()),
            }))
        })?;
        written.ok_or_else(|| StoreError::Corrupt {
            id: format!("{funnel_id}/{section}"),
            reason: "section write produced no version".to_string(),
        })
    }

    /// Read-modify-write of a section. `modify` receives the current
    /// version (re-read on every retry) and returns the new version, or
    /// `None` to leave the section unchanged.
    pub fn modify_section<F>(
        &self,
        funnel_id: &str,
        section: SectionId,
        mut modify: F,
    ) -> Result<Option<StoredSection>, StoreError>
    where
        F: FnMut(Option<&StoredSection>) -> Result<Option<SectionUpdate>, StoreError>,
    {
        let entity = format!("section {funnel_id}/{section}");
        self.versioned_upsert(&entity, || {
            let latest = section_repo::find_latest(&self.db, funnel_id, section.as_str())?;
            let current = latest.as_ref().map(section_from_row).transpose()?;
            let Some(update) = modify(current.as_ref())? else {
                return Ok(None);
            };

            let new = NewSectionVersion {
                funnel_id: funnel_id.to_string(),
                section_id: section.as_str().to_string(),
                numeric_key: section.numeric_key() as i64,
                phase: section.phase() as i64,
                content: serialize(&entity, &update.content)?,
                status: update.status.as_str().to_string(),
                metadata: update
                    .metadata
                    .as_ref()
                    .map(|m| serialize(&entity, m))
                    .transpose()?,
            };
            let next_version = latest.map(|r| r.version).unwrap_or(0) + 1;
            let row = section_repo::insert_version(&self.db, &new, next_version)?;
            Ok(Some(section_from_row(&row)?))
        })
    }

    pub fn approve_section(&self, funnel_id: &str, section: SectionId) -> Result<bool, StoreError> {
        self.set_section_status(funnel_id, section, SectionStatus::Approved)
    }

    pub fn mark_needs_revision(
        &self,
        funnel_id: &str,
        section: SectionId,
    ) -> Result<bool, StoreError> {
        self.set_section_status(funnel_id, section, SectionStatus::NeedsRevision)
    }

    fn set_section_status(
        &self,
        funnel_id: &str,
        section: SectionId,
        status: SectionStatus,
    ) -> Result<bool, StoreError> {
        Ok(section_repo::update_current_status(
            &self.db,
            funnel_id,
            section.as_str(),
            status.as_str(),
        )?)
    }

    // ─── Field writes ───────────────────────────────────────────────────────

    /// Writes `value` at `field_id`. A dotted path updates a sub-key of the
    /// parent field, which is persisted as one new version of the parent.
    pub fn write_field(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        value: Value,
    ) -> Result<FieldWrite, StoreError> {
        let written = self.modify_field(
            funnel_id,
            section,
            field_id,
            FieldWriteOptions::default(),
            |_| Ok(Some(FieldChange::new(value.clone()))),
        )?;
        written.ok_or_else(|| StoreError::Corrupt {
            id: format!("{funnel_id}/{section}/{field_id}"),
            reason: "field write produced no version".to_string(),
        })
    }

    /// Read-modify-write of the value at `field_id` (possibly dotted).
    /// `modify` receives the current value at that path, re-read on every
    /// retry, and returns the change or `None` to skip the write.
    pub fn modify_field<F>(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        options: FieldWriteOptions,
        modify: F,
    ) -> Result<Option<FieldWrite>, StoreError>
    where
        F: FnMut(Option<&Value>) -> Result<Option<FieldChange>, StoreError>,
    {
        if field_id.is_empty() || field_id.split('.').any(str::is_empty) {
            return Err(StoreError::EmptyFieldPath);
        }

        let (parent, child) = value::split_path(field_id);
        self.modify_field_row(funnel_id, section, parent, child, options, modify)
    }

    /// [`modify_field`](Self::modify_field) against an already split path.
    /// `parent` is the literal field row key and may itself contain dots.
    fn modify_field_row<F>(
        &self,
        funnel_id: &str,
        section: SectionId,
        parent: &str,
        child: Option<&str>,
        options: FieldWriteOptions,
        mut modify: F,
    ) -> Result<Option<FieldWrite>, StoreError>
    where
        F: FnMut(Option<&Value>) -> Result<Option<FieldChange>, StoreError>,
    {
        let field_id = match child {
            Some(child) => format!("{parent}.{child}"),
            None => parent.to_string(),
        };
        let field_id = field_id.as_str();
        let entity = format!("field {funnel_id}/{section}/{parent}");

        self.versioned_upsert(&entity, || {
            let latest = field_repo::find_latest(&self.db, funnel_id, section.as_str(), parent)?;
            let stored = latest
                .as_ref()
                .map(|row| decode_value(row))
                .transpose()?;

            let previous = match (&stored, child) {
                (Some(v), Some(path)) => value::get_path(v, path).cloned(),
                (Some(v), None) => Some(v.clone()),
                (None, _) => None,
            };

            let Some(FieldChange {
                value: new_value,
                provenance,
            }) = modify(previous.as_ref())?
            else {
                return Ok(None);
            };

            let parent_value = match child {
                None => new_value.clone(),
                Some(path) => {
                    let mut merged = stored.unwrap_or_else(|| json!({}));
                    if !value::set_path(&mut merged, path, new_value.clone()) {
                        return Err(StoreError::ParentNotObject {
                            parent: parent.to_string(),
                            path: field_id.to_string(),
                        });
                    }
                    merged
                }
            };

            let (raw, value_type) =
                value::encode(&parent_value).map_err(|source| StoreError::Serialization {
                    entity: entity.clone(),
                    source,
                })?;

            let display_order = match (&latest, options.display_order) {
                (Some(row), _) => row.display_order,
                (None, Some(order)) => order,
                (None, None) => self.next_display_order(funnel_id, section)?,
            };

            let existing = latest
                .as_ref()
                .and_then(|r| r.metadata.as_deref())
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
            let metadata = match provenance {
                Some(entry) => Some(append_provenance(existing, entry)),
                None => existing,
            };

            let new = NewFieldVersion {
                funnel_id: funnel_id.to_string(),
                section_id: section.as_str().to_string(),
                field_id: parent.to_string(),
                value: raw,
                value_type: value_type.to_string(),
                display_order,
                metadata: metadata.as_ref().map(|m| serialize(&entity, m)).transpose()?,
            };
            let next_version = latest.as_ref().map(|r| r.version).unwrap_or(0) + 1;
            let row = field_repo::insert_version(&self.db, &new, next_version)?;

            Ok(Some(FieldWrite {
                section,
                path: field_id.to_string(),
                field_id: parent.to_string(),
                version: row.version,
                previous,
                value: new_value,
            }))
        })
    }

    /// Upserts every top-level key of an object document as a field row,
    /// skipping keys whose stored value is already equal. Keys are taken
    /// literally, dots included; an empty key has no row and is skipped.
    pub fn sync_fields(
        &self,
        funnel_id: &str,
        section: SectionId,
        content: &Value,
    ) -> Result<Vec<FieldWrite>, StoreError> {
        let Some(map) = content.as_object() else {
            return Ok(Vec::new());
        };

        let mut writes = Vec::new();
        for (order, (key, value)) in map.iter().enumerate() {
            let options = FieldWriteOptions {
                display_order: Some(order as i64),
            };
            if key.is_empty() {
                log::warn!("Skipping empty field key in {} of funnel {}", section, funnel_id);
                continue;
            }
            let written = self.modify_field_row(funnel_id, section, key, None, options, |current| {
                Ok((current != Some(value)).then(|| FieldChange::new(value.clone())))
            })?;
            writes.extend(written);
        }
        Ok(writes)
    }

    pub fn approve_field(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
    ) -> Result<bool, StoreError> {
        let (parent, _) = value::split_path(field_id);
        Ok(field_repo::set_current_approved(
            &self.db,
            funnel_id,
            section.as_str(),
            parent,
            true,
        )?)
    }

    fn next_display_order(&self, funnel_id: &str, section: SectionId) -> Result<i64, StoreError> {
        let fields = field_repo::list_current_for_section(&self.db, funnel_id, section.as_str())?;
        Ok(fields
            .iter()
            .map(|f| f.display_order + 1)
            .max()
            .unwrap_or(0))
    }

    // ─── Retry primitive ────────────────────────────────────────────────────

    /// Runs `attempt` until it succeeds, fails with something other than a
    /// version collision, or the attempt bound is reached.
    fn versioned_upsert<T, F>(&self, entity: &str, mut attempt: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        for attempt_no in 1..=self.max_attempts {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(StoreError::Database(e)) if e.is_unique_violation() => {
                    log::debug!(
                        "Version conflict on {} (attempt {}/{}), retrying against latest",
                        entity,
                        attempt_no,
                        self.max_attempts
                    );
                    if attempt_no < self.max_attempts && !self.conflict_backoff.is_zero() {
                        std::thread::sleep(self.conflict_backoff * attempt_no);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!(
            "Giving up on {} after {} conflicting attempts",
            entity,
            self.max_attempts
        );
        Err(StoreError::ConcurrencyConflict {
            entity: entity.to_string(),
            attempts: self.max_attempts,
        })
    }
}

fn serialize(entity: &str, value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Serialization {
        entity: entity.to_string(),
        source,
    })
}

/// Appends `entry` to `metadata.propagations`, creating both as needed.
/// Non-object metadata is replaced.
pub fn append_provenance(metadata: Option<Value>, entry: Value) -> Value {
    let mut root = match metadata {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    match root.entry("propagations").or_insert_with(|| json!([])) {
        Value::Array(items) => items.push(entry),
        other => *other = json!([entry]),
    }
    Value::Object(root)
}

fn parse_timestamp(raw: &str, id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn parse_section_key(raw: &str, id: &str) -> Result<SectionId, StoreError> {
    SectionId::parse(raw).ok_or_else(|| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("unknown section '{raw}'"),
    })
}

fn parse_metadata(raw: Option<&str>, id: &str) -> Result<Option<Value>, StoreError> {
    raw.map(|m| {
        serde_json::from_str(m).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad metadata: {e}"),
        })
    })
    .transpose()
}

fn section_from_row(row: &SectionRow) -> Result<StoredSection, StoreError> {
    let content = serde_json::from_str(&row.content).map_err(|e| StoreError::Corrupt {
        id: row.id.clone(),
        reason: format!("bad content: {e}"),
    })?;
    let status = SectionStatus::parse(&row.status).ok_or_else(|| StoreError::Corrupt {
        id: row.id.clone(),
        reason: format!("unknown status '{}'", row.status),
    })?;

    Ok(StoredSection {
        funnel_id: row.funnel_id.clone(),
        section: parse_section_key(&row.section_id, &row.id)?,
        content,
        status,
        version: row.version,
        is_current_version: row.is_current_version,
        metadata: parse_metadata(row.metadata.as_deref(), &row.id)?,
        created_at: parse_timestamp(&row.created_at, &row.id)?,
    })
}

fn decode_value(row: &FieldRow) -> Result<Value, StoreError> {
    value::decode(&row.value, &row.value_type).map_err(|e| StoreError::Corrupt {
        id: row.id.clone(),
        reason: format!("bad value: {e}"),
    })
}

fn field_from_row(row: &FieldRow) -> Result<StoredField, StoreError> {
    Ok(StoredField {
        funnel_id: row.funnel_id.clone(),
        section: parse_section_key(&row.section_id, &row.id)?,
        field_id: row.field_id.clone(),
        value: decode_value(row)?,
        is_approved: row.is_approved,
        version: row.version,
        is_current_version: row.is_current_version,
        display_order: row.display_order,
        metadata: parse_metadata(row.metadata.as_deref(), &row.id)?,
        created_at: parse_timestamp(&row.created_at, &row.id)?,
    })
}

//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs
//! in its own transaction together with its bookkeeping row, so a failed
//! step leaves the schema at the previous version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;
use super::now_timestamp;

struct Migration {
    version: u32,
    name: &'static str,
    step: Step,
}

enum Step {
    Script(&'static str),
    /// Adds a nullable column unless a previous build already added it.
    AddColumn {
        table: &'static str,
        column: &'static str,
        sql_type: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_section_contents",
        step: Step::Script(include_str!("sql/001_create_section_contents.sql")),
    },
    Migration {
        version: 2,
        name: "create_field_values",
        step: Step::Script(include_str!("sql/002_create_field_values.sql")),
    },
    Migration {
        version: 3,
        name: "create_generation_jobs",
        step: Step::Script(include_str!("sql/003_create_generation_jobs.sql")),
    },
    Migration {
        version: 4,
        name: "create_generation_attempts",
        step: Step::Script(include_str!("sql/004_create_generation_attempts.sql")),
    },
    Migration {
        version: 5,
        name: "add_section_metadata",
        step: Step::AddColumn {
            table: "section_contents",
            column: "metadata",
            sql_type: "TEXT",
        },
    },
];

/// Highest applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to the latest version.
pub fn migrate(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied = schema_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!("Applying migration v{} ({})", migration.version, migration.name);
        apply(conn, migration).map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    match &migration.step {
        Step::Script(sql) => tx.execute_batch(sql)?,
        Step::AddColumn {
            table,
            column,
            sql_type,
        } => {
            if has_column(&tx, table, column)? {
                log::debug!("{}.{} already present", table, column);
            } else {
                tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type};"))?;
            }
        }
    }
    tx.execute(
        "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.name, now_timestamp()],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |r| r.get(0),
    )?;
    Ok(found > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = migrated();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrate_twice_is_harmless() {
        let conn = migrated();
        migrate(&conn).unwrap();
        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_add_column_tolerates_existing_column() {
        let conn = migrated();
        // Pretend v5 never got recorded although the column exists.
        conn.execute("DELETE FROM _migrations WHERE version = 5", [])
            .unwrap();
        migrate(&conn).unwrap();
        assert!(has_column(&conn, "section_contents", "metadata").unwrap());
        assert_eq!(schema_version(&conn).unwrap(), 5);
    }

    #[test]
    fn test_has_column() {
        let conn = migrated();
        assert!(has_column(&conn, "field_values", "display_order").unwrap());
        assert!(!has_column(&conn, "field_values", "nope").unwrap());
        assert!(!has_column(&conn, "no_such_table", "id").unwrap());
    }

    #[test]
    fn test_only_one_current_section_row_allowed() {
        let conn = migrated();
        let insert = "INSERT INTO section_contents (id, funnel_id, section_id, numeric_key, phase,
                      content, version, is_current_version, created_at, updated_at)
                      VALUES (?1, 'f1', 'offer', 4, 1, '{}', ?2, 1, 'now', 'now')";
        conn.execute(insert, params!["a", 1]).unwrap();
        let err = conn.execute(insert, params!["b", 2]).unwrap_err();
        assert!(DatabaseError::from(err).is_unique_violation());
    }

    #[test]
    fn test_field_version_is_unique() {
        let conn = migrated();
        let insert = "INSERT INTO field_values (id, funnel_id, section_id, field_id, value,
                      version, is_current_version, created_at, updated_at)
                      VALUES (?1, 'f1', 'offer', 'offerName', 'Acme', 1, ?2, 'now', 'now')";
        conn.execute(insert, params!["a", 0]).unwrap();
        let err = conn.execute(insert, params!["b", 0]).unwrap_err();
        assert!(DatabaseError::from(err).is_unique_violation());
    }
}

//! SQLite DDL for the barnabee memory store (§3, §6 persisted-state layout).
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation, mirroring the teacher's
//! `memory/schema.rs` layout.

use rusqlite::Connection;

/// Current schema version stamped into `schema_meta` on first open.
/// Memory records must remain readable by the next minor version (§6).
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the barnabee memory database. Uses `IF NOT EXISTS`
/// throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Core memory records table — mirrors crate::model::Memory fields.
CREATE TABLE IF NOT EXISTS memory_records (
    id               TEXT PRIMARY KEY,
    content          TEXT NOT NULL,
    kind             TEXT NOT NULL,              -- snake_case MemoryKind variant
    base_importance  REAL NOT NULL DEFAULT 0.5,
    emotion          TEXT,
    participants     TEXT NOT NULL DEFAULT '[]',  -- JSON array of speaker ids
    tags             TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    created_at       INTEGER NOT NULL DEFAULT 0,
    last_accessed    INTEGER NOT NULL DEFAULT 0,
    access_count     INTEGER NOT NULL DEFAULT 0,
    archived         INTEGER NOT NULL DEFAULT 0,  -- 0/1
    archived_at      INTEGER
);

CREATE INDEX IF NOT EXISTS idx_records_archived      ON memory_records(archived);
CREATE INDEX IF NOT EXISTS idx_records_kind          ON memory_records(kind);
CREATE INDEX IF NOT EXISTS idx_records_last_accessed ON memory_records(last_accessed);

-- Append-only audit trail for memory mutations (distinct from the request
-- audit log in crate::model::AuditEntry — this one tracks create/forget/
-- reinforce/archive transitions on individual memory records).
CREATE TABLE IF NOT EXISTS memory_audit (
    id        TEXT PRIMARY KEY,
    op        TEXT NOT NULL,       -- create | soft_delete | reinforce | archive | purge
    target_id TEXT,
    note      TEXT NOT NULL,
    at        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memory_audit_at ON memory_audit(at);
"#;

/// Apply the full schema to an open connection. Safe to call multiple
/// times. Seeds the schema version into `schema_meta` if this is a fresh
/// database; never overwrites an existing version on reapply.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    let version_str = CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;
    Ok(())
}

/// Embedding vector width. Fixed at virtual-table creation time by
/// sqlite-vec; the operator's configured `LanguageModel::embed()`
/// implementation must produce vectors of this width (documented as an
/// assumption in DESIGN.md, carried over from the teacher's
/// all-MiniLM-L6-v2 usage).
pub const EMBEDDING_DIM: usize = 384;

const VEC_EMBEDDINGS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_embeddings USING vec0(
    record_id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Create the `vec_embeddings` virtual table. Must be called after
/// `sqlite_vec` has been registered as an auto-extension on the process.
/// Safe to call multiple times (`IF NOT EXISTS`).
pub(crate) fn apply_vec_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(VEC_EMBEDDINGS_SQL)
}

/// Read the current schema version. Returns `None` if `schema_meta` has
/// no version entry yet.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_schema_creates_tables() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"memory_records".to_owned()));
        assert!(tables.contains(&"memory_audit".to_owned()));
        assert!(tables.contains(&"schema_meta".to_owned()));
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");
        apply_schema(&conn).expect("second apply_schema (idempotent)");
    }

    #[test]
    fn schema_version_is_seeded() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply_schema");
        let version = read_schema_version(&conn).expect("read").expect("version should exist");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn schema_version_not_overwritten_on_reapply() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply");
        conn.execute("UPDATE schema_meta SET value = '999' WHERE key = 'schema_version'", [])
            .expect("bump version");
        apply_schema(&conn).expect("second apply");
        let version = read_schema_version(&conn).expect("read").expect("version exists");
        assert_eq!(version, 999);
    }
}

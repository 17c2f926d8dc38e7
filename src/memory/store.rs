//! C7 Memory Writer: create, soft-delete, reinforce, and decay-maintain
//! durable memories over a SQLite-backed store, plus the vector-embedding
//! sidecar table used by the C6 Memory Retriever.
//!
//! Grounded on the teacher's `memory/sqlite.rs::SqliteMemoryRepository`:
//! same `Mutex<Connection>` single-file layout, the same `sqlite-vec`
//! auto-extension registration dance, and the same delete-then-insert
//! pattern for replacing an embedding (vec0 has no UPSERT). Rewritten
//! against `crate::model::Memory` instead of the teacher's own
//! `MemoryRecord`/`MemoryStatus` types.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};

use crate::config::MemoryScoringConfig;
use crate::error::{CoreError, Result};
use crate::model::{new_id, now_epoch_secs, Memory, MemoryKind};

use super::schema::{apply_schema, apply_vec_schema, read_schema_version, EMBEDDING_DIM};
use super::scoring::effective_importance;

const DB_FILENAME: &str = "barnabee.db";

/// Register the `sqlite-vec` extension globally, once per process.
fn ensure_sqlite_vec_loaded() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the documented extension entry point
        // exported by the `sqlite-vec` crate (statically linked). Registering
        // it as an auto-extension is the crate's documented activation path;
        // the transmute mirrors sqlite-vec's own test suite.
        unsafe {
            type ExtEntryPoint = unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *const i8,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> i32;

            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                ExtEntryPoint,
            >(sqlite_vec::sqlite3_vec_init as *const ())));
        }
    });
}

/// Summary of one maintenance pass (§4.7).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub archived: usize,
    pub purged: usize,
}

/// Optional filters applied when listing candidate memories for retrieval
/// (§4.6 step 4: "filter by speaker/tag/type filters; drop archived").
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    pub speaker_id: Option<String>,
    pub tag: Option<String>,
    pub kind: Option<MemoryKind>,
}

/// SQLite-backed durable memory store. Thread-safe via an internal
/// `Mutex<Connection>`; writes are serialized per §5's "per-id write
/// serialization" requirement (trivially satisfied by serializing all
/// writes through one connection).
pub struct MemoryStore {
    root: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("root", &self.root).finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) the database at `{root_dir}/barnabee.db`, applying
    /// schema and the vector sidecar table.
    pub fn new(root_dir: &Path) -> Result<Self> {
        ensure_sqlite_vec_loaded();
        std::fs::create_dir_all(root_dir)?;
        let db_path = root_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path)
            .map_err(|e| CoreError::Memory(format!("opening {}: {e}", db_path.display())))?;
        apply_schema(&conn).map_err(|e| CoreError::Memory(e.to_string()))?;
        apply_vec_schema(&conn).map_err(|e| CoreError::Memory(e.to_string()))?;

        let store = Self { root: root_dir.to_path_buf(), conn: Mutex::new(conn) };
        if let Err(e) = store.integrity_check() {
            tracing::warn!(error = %e, "memory store integrity check failed on startup");
        }
        Ok(store)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CoreError::Memory(format!("store lock poisoned: {e}")))
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        let v = read_schema_version(&conn).map_err(|e| CoreError::Memory(e.to_string()))?;
        Ok(v.unwrap_or(0))
    }

    pub fn integrity_check(&self) -> Result<()> {
        let conn = self.lock()?;
        let result: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        if result == "ok" {
            Ok(())
        } else {
            Err(CoreError::Memory(format!("integrity check failed: {result}")))
        }
    }

    /// Create a durable memory record, writing the audit trail alongside
    /// it (§4.7 `create(memory)`).
    pub fn create(&self, memory: &Memory) -> Result<()> {
        let conn = self.lock()?;
        let participants_json = serde_json::to_string(&memory.participants).unwrap_or_else(|_| "[]".into());
        let tags_json = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".into());

        conn.execute(
            "INSERT INTO memory_records \
             (id, content, kind, base_importance, emotion, participants, tags, \
              created_at, last_accessed, access_count, archived, archived_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                memory.id,
                memory.content,
                memory.kind.as_str(),
                memory.base_importance,
                memory.emotion,
                participants_json,
                tags_json,
                memory.created_at,
                memory.last_accessed,
                memory.access_count,
                memory.archived as i64,
                memory.archived_at,
            ],
        )
        .map_err(|e| CoreError::Memory(e.to_string()))?;

        write_audit(&conn, "create", Some(&memory.id), &format!("create {}", memory.kind.as_str()))?;
        Ok(())
    }

    /// Fetch a single memory by id.
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_records WHERE id = ?1")
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        let mut rows = stmt.query(params![id]).map_err(|e| CoreError::Memory(e.to_string()))?;
        match rows.next().map_err(|e| CoreError::Memory(e.to_string()))? {
            Some(row) => Ok(Some(row_to_memory(row).map_err(|e| CoreError::Memory(e.to_string()))?)),
            None => Ok(None),
        }
    }

    /// List non-archived memories, optionally narrowed by `filters`.
    pub fn list_active(&self, filters: &MemoryFilters) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM memory_records WHERE archived = 0 ORDER BY last_accessed DESC")
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_memory)
            .map_err(|e| CoreError::Memory(e.to_string()))?;

        let mut out = Vec::new();
        for r in rows {
            let m = r.map_err(|e| CoreError::Memory(e.to_string()))?;
            if let Some(speaker) = &filters.speaker_id {
                if !m.has_participant(speaker) {
                    continue;
                }
            }
            if let Some(tag) = &filters.tag {
                if !m.tag_set().contains(tag.as_str()) {
                    continue;
                }
            }
            if let Some(kind) = filters.kind {
                if m.kind != kind {
                    continue;
                }
            }
            out.push(m);
        }
        Ok(out)
    }

    /// Soft-delete (archive) a memory by id, writing the reason to the
    /// audit log. Never hard-deletes (§4.11 `forget`: "never hard-delete
    /// from the audit log"). Returns whether a matching, non-archived
    /// record existed.
    pub fn soft_delete(&self, id: &str, reason: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let rows = conn
            .execute(
                "UPDATE memory_records SET archived = 1, archived_at = ?1 \
                 WHERE id = ?2 AND archived = 0",
                params![now, id],
            )
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        if rows > 0 {
            write_audit(&conn, "soft_delete", Some(id), reason)?;
        }
        Ok(rows > 0)
    }

    /// Soft-delete every active memory matching `filters`. Returns the
    /// count affected.
    pub fn soft_delete_matching(&self, filters: &MemoryFilters, reason: &str) -> Result<usize> {
        let candidates = self.list_active(filters)?;
        let mut count = 0;
        for m in &candidates {
            if self.soft_delete(&m.id, reason)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Add `increment` to `base_importance`, saturating at 1.0 (§4.7
    /// `reinforce`, monotone non-decreasing per §8).
    pub fn reinforce(&self, id: &str, increment: f32) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE memory_records SET base_importance = MIN(1.0, base_importance + ?1) \
                 WHERE id = ?2",
                params![increment, id],
            )
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        if rows == 0 {
            return Err(CoreError::Memory(format!("reinforce: no such memory {id}")));
        }
        write_audit(&conn, "reinforce", Some(id), "reinforce")?;
        Ok(())
    }

    /// Stamp `last_accessed = now` and increment `access_count` for a
    /// retrieved memory (§4.6 step 5, best-effort side effect — failures
    /// here never abort a retrieval).
    pub fn touch_access(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE memory_records SET last_accessed = ?1, access_count = access_count + 1 \
             WHERE id = ?2",
            params![now_epoch_secs(), id],
        )
        .map_err(|e| CoreError::Memory(e.to_string()))?;
        Ok(())
    }

    /// Recompute effective importance for every active memory; archive
    /// those that fall below `cfg.archive_threshold`; purge archived
    /// memories older than `cfg.delete_after_days` (§4.7 maintenance pass).
    pub fn maintenance_pass(&self, cfg: &MemoryScoringConfig) -> Result<MaintenanceReport> {
        let now = now_epoch_secs();
        let active = self.list_active(&MemoryFilters::default())?;
        let mut report = MaintenanceReport::default();

        for m in &active {
            let eff = effective_importance(m, cfg, now);
            if eff < cfg.archive_threshold && self.soft_delete(&m.id, "decay below archive threshold")? {
                report.archived += 1;
            }
        }

        let cutoff = now.saturating_sub(cfg.delete_after_days.saturating_mul(86_400));
        let conn = self.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM memory_records WHERE archived = 1 AND archived_at IS NOT NULL AND archived_at < ?1",
                params![cutoff],
            )
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        if purged > 0 {
            write_audit(&conn, "purge", None, &format!("purged {purged} memories past TTL"))?;
        }
        report.purged = purged;
        Ok(report)
    }

    // -- vector-embedding sidecar (§4.6, grounded on the teacher's vec0 usage) --

    /// Store (replacing any existing) embedding for `record_id`. `vec0`
    /// tables have no UPSERT, so an existing row is deleted first.
    pub fn store_embedding(&self, record_id: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(CoreError::InternalInvariant(format!(
                "embedding dimension mismatch: expected {EMBEDDING_DIM}, got {}",
                embedding.len()
            )));
        }
        let conn = self.lock()?;
        let blob: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        conn.execute("DELETE FROM vec_embeddings WHERE record_id = ?1", params![record_id])
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        conn.execute(
            "INSERT INTO vec_embeddings (record_id, embedding) VALUES (?1, ?2)",
            params![record_id, blob],
        )
        .map_err(|e| CoreError::Memory(e.to_string()))?;
        Ok(())
    }

    pub fn get_embedding(&self, record_id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT embedding FROM vec_embeddings WHERE record_id = ?1")
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        let mut rows = stmt.query(params![record_id]).map_err(|e| CoreError::Memory(e.to_string()))?;
        match rows.next().map_err(|e| CoreError::Memory(e.to_string()))? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0).map_err(|e| CoreError::Memory(e.to_string()))?;
                if blob.len() != EMBEDDING_DIM * std::mem::size_of::<f32>() {
                    return Err(CoreError::InternalInvariant(format!(
                        "stored embedding size mismatch: expected {} bytes, got {}",
                        EMBEDDING_DIM * std::mem::size_of::<f32>(),
                        blob.len()
                    )));
                }
                let floats = blob
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(Some(floats))
            }
            None => Ok(None),
        }
    }

    /// Nearest `limit` embeddings to `query_vec` by the vec0 index's
    /// native distance metric, ascending. Used only to pick an
    /// oversampled candidate set — final ranking uses exact cosine
    /// similarity computed by the retriever from the fetched vectors.
    pub fn search_by_vector(&self, query_vec: &[f32], limit: usize) -> Result<Vec<(String, f64)>> {
        if query_vec.len() != EMBEDDING_DIM {
            return Err(CoreError::InternalInvariant(format!(
                "query vector dimension mismatch: expected {EMBEDDING_DIM}, got {}",
                query_vec.len()
            )));
        }
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_id, distance FROM vec_embeddings \
                 WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            )
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        let blob: Vec<u8> = query_vec.iter().flat_map(|f| f.to_le_bytes()).collect();
        let results = stmt
            .query_map(params![blob, limit as i64], |row| {
                let id: String = row.get(0)?;
                let dist: f64 = row.get(1)?;
                Ok((id, dist))
            })
            .map_err(|e| CoreError::Memory(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        Ok(results)
    }

    pub fn has_embedding(&self, record_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM vec_embeddings WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .map_err(|e| CoreError::Memory(e.to_string()))?;
        Ok(count > 0)
    }
}

fn write_audit(conn: &Connection, op: &str, target_id: Option<&str>, note: &str) -> Result<()> {
    let id = new_id("maud");
    conn.execute(
        "INSERT INTO memory_audit (id, op, target_id, note, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, op, target_id, note, now_epoch_secs()],
    )
    .map_err(|e| CoreError::Memory(e.to_string()))?;
    Ok(())
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let kind_str: String = row.get("kind")?;
    let participants_json: String = row.get("participants")?;
    let tags_json: String = row.get("tags")?;
    let archived_int: i64 = row.get("archived")?;

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        kind: MemoryKind::from_str(&kind_str).unwrap_or(MemoryKind::Observation),
        base_importance: row.get("base_importance")?,
        emotion: row.get("emotion")?,
        participants: serde_json::from_str(&participants_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get("created_at")?,
        last_accessed: row.get("last_accessed")?,
        access_count: row.get::<_, i64>("access_count")? as u32,
        archived: archived_int != 0,
        archived_at: row.get("archived_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, MemoryStore) {
        let tmp = TempDir::new().expect("tempdir");
        let store = MemoryStore::new(tmp.path()).expect("open store");
        (tmp, store)
    }

    #[test]
    fn create_then_get_round_trips() {
        let (_tmp, store) = temp_store();
        let mut m = Memory::new("favorite color is blue", MemoryKind::Preference, 0.6);
        m.participants.push("alice".into());
        store.create(&m).expect("create");

        let fetched = store.get(&m.id).expect("get").expect("present");
        assert_eq!(fetched.content, m.content);
        assert_eq!(fetched.kind, MemoryKind::Preference);
        assert!(fetched.has_participant("alice"));
    }

    #[test]
    fn soft_delete_excludes_from_list_active() {
        let (_tmp, store) = temp_store();
        let m = Memory::new("transient note", MemoryKind::Transient, 0.3);
        store.create(&m).expect("create");
        assert!(store.soft_delete(&m.id, "forget requested").expect("soft_delete"));

        let active = store.list_active(&MemoryFilters::default()).expect("list");
        assert!(active.iter().all(|x| x.id != m.id));

        let still_there = store.get(&m.id).expect("get").expect("still present for audit");
        assert!(still_there.archived);
    }

    #[test]
    fn soft_delete_unknown_id_returns_false() {
        let (_tmp, store) = temp_store();
        assert!(!store.soft_delete("mem-does-not-exist", "x").expect("soft_delete"));
    }

    #[test]
    fn reinforce_is_monotone_and_saturates() {
        let (_tmp, store) = temp_store();
        let m = Memory::new("x", MemoryKind::Routine, 0.5);
        store.create(&m).expect("create");

        store.reinforce(&m.id, 0.2).expect("reinforce");
        let after_one = store.get(&m.id).expect("get").expect("present").base_importance;
        assert!((after_one - 0.7).abs() < 1e-5);

        for _ in 0..10 {
            store.reinforce(&m.id, 0.2).expect("reinforce");
        }
        let saturated = store.get(&m.id).expect("get").expect("present").base_importance;
        assert!((saturated - 1.0).abs() < 1e-5);
    }

    #[test]
    fn touch_access_increments_count_and_bumps_last_accessed() {
        let (_tmp, store) = temp_store();
        let mut m = Memory::new("x", MemoryKind::Observation, 0.5);
        m.last_accessed -= 1000;
        store.create(&m).expect("create");

        store.touch_access(&m.id).expect("touch");
        let after = store.get(&m.id).expect("get").expect("present");
        assert_eq!(after.access_count, 1);
        assert!(after.last_accessed >= m.last_accessed);
    }

    #[test]
    fn maintenance_pass_archives_below_threshold() {
        let (_tmp, store) = temp_store();
        let mut stale = Memory::new("old transient chatter", MemoryKind::Transient, 0.2);
        stale.last_accessed -= 400 * 86_400;
        store.create(&stale).expect("create");

        let cfg = MemoryScoringConfig::default();
        let report = store.maintenance_pass(&cfg).expect("maintenance");
        assert_eq!(report.archived, 1);

        let after = store.get(&stale.id).expect("get").expect("present");
        assert!(after.archived);
    }

    #[test]
    fn maintenance_pass_purges_long_archived() {
        let (_tmp, store) = temp_store();
        let m = Memory::new("ancient", MemoryKind::Transient, 0.2);
        store.create(&m).expect("create");
        store.soft_delete(&m.id, "test").expect("soft_delete");

        // Backdate archived_at beyond delete_after_days.
        {
            let conn = store.lock().expect("lock");
            conn.execute(
                "UPDATE memory_records SET archived_at = ?1 WHERE id = ?2",
                params![now_epoch_secs() - 200 * 86_400, m.id],
            )
            .expect("backdate");
        }

        let cfg = MemoryScoringConfig::default();
        let report = store.maintenance_pass(&cfg).expect("maintenance");
        assert_eq!(report.purged, 1);
        assert!(store.get(&m.id).expect("get").is_none());
    }

    #[test]
    fn embedding_round_trips() {
        let (_tmp, store) = temp_store();
        let m = Memory::new("x", MemoryKind::Observation, 0.5);
        store.create(&m).expect("create");

        let vec: Vec<f32> = (0..EMBEDDING_DIM).map(|i| i as f32 * 0.001).collect();
        store.store_embedding(&m.id, &vec).expect("store_embedding");
        assert!(store.has_embedding(&m.id).expect("has_embedding"));

        let fetched = store.get_embedding(&m.id).expect("get_embedding").expect("present");
        assert_eq!(fetched.len(), EMBEDDING_DIM);
        assert!((fetched[1] - 0.001).abs() < 1e-6);
    }

    #[test]
    fn wrong_dimension_embedding_is_rejected() {
        let (_tmp, store) = temp_store();
        let m = Memory::new("x", MemoryKind::Observation, 0.5);
        store.create(&m).expect("create");
        let bad = vec![0.0_f32; 10];
        assert!(store.store_embedding(&m.id, &bad).is_err());
    }

    #[test]
    fn filters_narrow_list_active_by_speaker() {
        let (_tmp, store) = temp_store();
        let mut a = Memory::new("alice's fact", MemoryKind::Preference, 0.5);
        a.participants.push("alice".into());
        let mut b = Memory::new("bob's fact", MemoryKind::Preference, 0.5);
        b.participants.push("bob".into());
        store.create(&a).expect("create");
        store.create(&b).expect("create");

        let filters = MemoryFilters { speaker_id: Some("alice".into()), ..Default::default() };
        let results = store.list_active(&filters).expect("list");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a.id);
    }
}

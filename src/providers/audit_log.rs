//! Append-only, segmented-by-day [`AuditSink`] (§6, §4.13: "audit writes use
//! synchronous append"). One JSON-lines file per UTC calendar day under
//! [`crate::paths::audit_dir`], matching §6's "audit log as an append-only
//! segmented store" persisted-state note.
//!
//! Per-conversation ordering (§5: "the audit sink must preserve submission
//! order per conversation") falls directly out of a single `Mutex<File>`
//! serializing every append — the orchestrator itself already calls
//! `append` synchronously and in request order.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{CoreError, Result};
use crate::interfaces::AuditSink;
use crate::model::AuditEntry;

/// Append-only segmented audit log: one `YYYY-MM-DD.jsonl` file per day.
pub struct FileAuditSink {
    root: PathBuf,
    open_file: Mutex<Option<(String, std::fs::File)>>,
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink").field("root", &self.root).finish_non_exhaustive()
    }
}

impl FileAuditSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, open_file: Mutex::new(None) })
    }

    fn segment_name() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| CoreError::InternalInvariant(format!("audit entry not serializable: {e}")))?;
        let segment = Self::segment_name();
        let mut guard = self.open_file.lock().expect("audit sink lock poisoned");
        let needs_reopen = guard.as_ref().is_none_or(|(name, _)| *name != segment);
        if needs_reopen {
            let path = self.root.join(format!("{segment}.jsonl"));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some((segment, file));
        }
        let (_, file) = guard.as_mut().expect("just opened");
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Intent, Request};
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_writes_one_jsonl_line_per_entry() {
        let tmp = TempDir::new().expect("tempdir");
        let sink = FileAuditSink::new(tmp.path()).expect("sink");
        let request = Request::new("what time is it");
        let entry = AuditEntry::new(&request, "It's 2pm.", Intent::Instant, "instant");
        sink.append(entry).await.expect("append");

        let segment = FileAuditSink::segment_name();
        let contents = std::fs::read_to_string(tmp.path().join(format!("{segment}.jsonl"))).expect("read");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("It's 2pm."));
    }

    #[tokio::test]
    async fn append_is_ordered_within_a_segment() {
        let tmp = TempDir::new().expect("tempdir");
        let sink = FileAuditSink::new(tmp.path()).expect("sink");
        for i in 0..5 {
            let request = Request::new(format!("utterance {i}"));
            let entry = AuditEntry::new(&request, &format!("response {i}"), Intent::Conversation, "conversation");
            sink.append(entry).await.expect("append");
        }
        let segment = FileAuditSink::segment_name();
        let contents = std::fs::read_to_string(tmp.path().join(format!("{segment}.jsonl"))).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 5);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.contains(&format!("response {i}")));
        }
    }
}

//! File-backed [`Secrets`] collaborator (§6). Reads one file per secret
//! name from a directory; the core never persists secrets itself, so this
//! adapter is read-only and never writes back.
//!
//! Per the design-notes open question resolution (§9): the source
//! occasionally falls back to a hard-coded bearer token when the secret
//! store is unavailable. This adapter does not: a missing secret file
//! surfaces as [`CoreError::Config`], not a silent default.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::interfaces::Secrets;

pub struct FileSecrets {
    root: PathBuf,
}

impl FileSecrets {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Secrets for FileSecrets {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(CoreError::Config(format!("invalid secret name: {name:?}")));
        }
        let path = self.root.join(name);
        std::fs::read(&path).map(|bytes| {
            let trimmed_len = bytes.iter().rposition(|b| *b != b'\n' && *b != b'\r').map_or(0, |i| i + 1);
            bytes[..trimmed_len].to_vec()
        }).map_err(|e| {
            CoreError::Config(format!("secret {name:?} unavailable: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn get_reads_trimmed_secret_file() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("ha_token"), b"secret-value\n").expect("write");
        let secrets = FileSecrets::new(tmp.path());
        let value = secrets.get("ha_token").await.expect("get");
        assert_eq!(value, b"secret-value");
    }

    #[tokio::test]
    async fn get_rejects_path_traversal_names() {
        let tmp = TempDir::new().expect("tempdir");
        let secrets = FileSecrets::new(tmp.path());
        let err = secrets.get("../escape").await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn get_surfaces_missing_secret_as_config_error() {
        let tmp = TempDir::new().expect("tempdir");
        let secrets = FileSecrets::new(tmp.path());
        let err = secrets.get("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}

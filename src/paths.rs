//! Centralized application directory paths for barnabee.
//!
//! Provides a single source of truth for all filesystem paths used by the
//! core. Uses the [`dirs`] crate for platform-appropriate directory
//! resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|----------------|-------|
//! | App data | `~/Library/Application Support/barnabee/` | `~/.local/share/barnabee/` |
//! | Config | `~/Library/Application Support/barnabee/` | `~/.config/barnabee/` |
//! | Cache | `~/Library/Caches/barnabee/` | `~/.cache/barnabee/` |
//!
//! # Environment Overrides
//!
//! All paths can be overridden for testing or custom deployments:
//! - `BARNABEE_DATA_DIR` — overrides [`data_dir`]
//! - `BARNABEE_CONFIG_DIR` — overrides [`config_dir`]
//! - `BARNABEE_CACHE_DIR` — overrides [`cache_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Used for persistent data: the memory store, the audit log, and the
/// declarative pattern-set / override-rule files.
///
/// Resolves to `dirs::data_dir()/barnabee/` by default. Override with the
/// `BARNABEE_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BARNABEE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("barnabee"))
        .unwrap_or_else(|| PathBuf::from("/tmp/barnabee-data"))
}

/// Application config directory.
///
/// Used for `config.toml` and the versioned declarative-config directory.
///
/// Resolves to `dirs::config_dir()/barnabee/` by default. Override with the
/// `BARNABEE_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BARNABEE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("barnabee"))
        .unwrap_or_else(|| PathBuf::from("/tmp/barnabee-config"))
}

/// Application cache directory.
///
/// Resolves to `dirs::cache_dir()/barnabee/` by default. Override with the
/// `BARNABEE_CACHE_DIR` environment variable.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BARNABEE_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("barnabee"))
        .unwrap_or_else(|| PathBuf::from("/tmp/barnabee-cache"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Memory database root directory (`data_dir()/memory/`).
#[must_use]
pub fn memory_dir() -> PathBuf {
    data_dir().join("memory")
}

/// Default pattern-set file path (`config_dir()/patterns.toml`).
///
/// Hot-reloadable: the pattern loader re-reads this path on an external
/// trigger and atomically swaps the active set on success.
#[must_use]
pub fn pattern_set_file() -> PathBuf {
    config_dir().join("patterns.toml")
}

/// Override-rules file path (`config_dir()/overrides.toml`).
#[must_use]
pub fn overrides_file() -> PathBuf {
    config_dir().join("overrides.toml")
}

/// Audit log directory (`data_dir()/audit/`), an append-only segmented
/// store of [`crate::model::AuditEntry`] records.
#[must_use]
pub fn audit_dir() -> PathBuf {
    data_dir().join("audit")
}

//! User-, room-, and time-scoped override rules (§6): mutations of
//! response volume, blocked domains, and confirmation thresholds applied
//! on top of the Orchestrator's defaults. Matching is deterministic by
//! (scope specificity, rule priority); first match wins per scope.
//!
//! Held behind the same `RwLock<Arc<OverrideSet>>` atomic-swap idiom as
//! [`crate::pattern::PatternStore`], since the override table is declared
//! hot-reloadable alongside the pattern set.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// What a rule matches against. Declared most-to-least specific; that
/// ordering doubles as the specificity rank used when several rules apply
/// to the same request (§6: "deterministic by (scope specificity, rule
/// priority)").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideScope {
    User { speaker_id: String },
    Room { room_id: String },
    TimeWindow { start_hour: u32, end_hour: u32 },
}

impl OverrideScope {
    fn specificity(&self) -> u8 {
        match self {
            OverrideScope::User { .. } => 0,
            OverrideScope::Room { .. } => 1,
            OverrideScope::TimeWindow { .. } => 2,
        }
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            OverrideScope::User { speaker_id } => ctx.speaker_id == Some(speaker_id.as_str()),
            OverrideScope::Room { room_id } => ctx.room_id == Some(room_id.as_str()),
            OverrideScope::TimeWindow { start_hour, end_hour } => {
                if start_hour <= end_hour {
                    (*start_hour..*end_hour).contains(&ctx.hour)
                } else {
                    // Wraps past midnight, e.g. 22..6.
                    ctx.hour >= *start_hour || ctx.hour < *end_hour
                }
            }
        }
    }
}

/// One declarative override rule as loaded from the override-rules file.
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRule {
    pub id: String,
    pub scope: OverrideScope,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub response_volume: Option<f32>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub confirmation_threshold: Option<f32>,
}

/// Top-level declarative override-rules file shape.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OverrideFile {
    #[serde(default)]
    pub rules: Vec<OverrideRule>,
}

/// The context a request carries for override resolution.
pub struct MatchContext<'a> {
    pub speaker_id: Option<&'a str>,
    pub room_id: Option<&'a str>,
    pub hour: u32,
}

/// The active, loaded set of override rules.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    rules: Vec<OverrideRule>,
}

impl OverrideSet {
    #[must_use]
    pub fn from_rules(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    /// Resolve the highest-priority, most-specific matching rule for
    /// `ctx`. Ties broken by declaration order (stable sort).
    #[must_use]
    pub fn resolve(&self, ctx: &MatchContext<'_>) -> Option<&OverrideRule> {
        self.rules
            .iter()
            .filter(|r| r.scope.matches(ctx))
            .min_by_key(|r| (r.scope.specificity(), std::cmp::Reverse(r.priority)))
    }

    #[must_use]
    pub fn is_domain_blocked(&self, ctx: &MatchContext<'_>, domain: &str) -> bool {
        self.resolve(ctx).is_some_and(|r| r.blocked_domains.iter().any(|d| d == domain))
    }
}

/// Read and parse the declarative override-rules file at `path`. An
/// absent file is not an error: it means no override rules are configured
/// yet, so this returns an empty set (§6: override rules are optional
/// scope-specific mutations layered on top of defaults).
pub fn load_from_path(path: &Path) -> Result<OverrideSet> {
    if !path.exists() {
        return Ok(OverrideSet::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
    let file: OverrideFile = toml::from_str(&text).map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))?;
    Ok(OverrideSet::from_rules(file.rules))
}

/// Shared, atomically-swapped reference to the active override set,
/// mirroring [`crate::pattern::PatternStore`]'s swap-on-reload shape.
#[derive(Debug)]
pub struct OverrideStore {
    active: RwLock<Arc<OverrideSet>>,
}

impl OverrideStore {
    #[must_use]
    pub fn new(initial: OverrideSet) -> Self {
        Self { active: RwLock::new(Arc::new(initial)) }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<OverrideSet> {
        Arc::clone(&self.active.read().expect("override store lock poisoned"))
    }

    pub fn swap(&self, candidate: OverrideSet) {
        let mut guard = self.active.write().expect("override store lock poisoned");
        *guard = Arc::new(candidate);
    }
}

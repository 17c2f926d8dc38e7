//! C2 Pattern Matcher — ordered priority groups of compiled regex patterns.
//!
//! The active set is held behind an `RwLock<Arc<PatternSet>>` so that a
//! request takes a cheap `Arc` snapshot and sees either the whole old set or
//! the whole new one, never a mix, per the "module-level mutable pattern
//! list → atomically swapped reference" re-architecture note.

use std::path::Path;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::model::{Classification, ClassificationSource, Intent};

/// Priority groups, evaluated highest-priority first (§4.2).
pub const GROUP_ORDER: &[PatternGroup] = &[
    PatternGroup::Emergency,
    PatternGroup::Instant,
    PatternGroup::Gesture,
    PatternGroup::Action,
    PatternGroup::Memory,
    PatternGroup::Query,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternGroup {
    Emergency,
    Instant,
    Gesture,
    Action,
    Memory,
    Query,
}

impl PatternGroup {
    #[must_use]
    pub fn intent(self) -> Intent {
        match self {
            PatternGroup::Emergency => Intent::Emergency,
            PatternGroup::Instant => Intent::Instant,
            PatternGroup::Gesture => Intent::Gesture,
            PatternGroup::Action => Intent::Action,
            PatternGroup::Memory => Intent::Memory,
            PatternGroup::Query => Intent::Query,
        }
    }

    /// Priority rank; lower is higher priority. Used by tests asserting the
    /// group-ordering invariant in §8.
    #[must_use]
    pub fn rank(self) -> usize {
        GROUP_ORDER.iter().position(|g| *g == self).unwrap_or(usize::MAX)
    }
}

/// One declarative pattern entry as loaded from the pattern-set file, before
/// compilation.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternSpec {
    pub id: String,
    pub group: PatternGroup,
    pub regex: String,
    pub sub_category: String,
    pub confidence: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Top-level declarative pattern-set file shape.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternFile {
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

/// A pattern that failed to compile: kept around only to surface a
/// load-time warning, never a runtime failure (§4.2).
#[derive(Debug, Clone)]
pub struct DisabledPattern {
    pub id: String,
    pub reason: String,
}

/// A compiled pattern ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub id: String,
    pub group: PatternGroup,
    pub regex: Regex,
    pub sub_category: String,
    pub confidence: f32,
}

/// The active, compiled pattern set, organized by priority group.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    groups: Vec<(PatternGroup, Vec<CompiledPattern>)>,
    pub disabled: Vec<DisabledPattern>,
}

impl PatternSet {
    /// Compile `specs` into a pattern set. A pattern whose regex fails to
    /// compile, or whose `enabled` flag is false, is recorded in
    /// `disabled` and excluded from matching rather than aborting the load.
    #[must_use]
    pub fn compile(specs: &[PatternSpec]) -> Self {
        let mut groups: Vec<(PatternGroup, Vec<CompiledPattern>)> =
            GROUP_ORDER.iter().map(|g| (*g, Vec::new())).collect();
        let mut disabled = Vec::new();

        for spec in specs {
            if !spec.enabled {
                disabled.push(DisabledPattern { id: spec.id.clone(), reason: "disabled".into() });
                continue;
            }
            match Regex::new(&spec.regex) {
                Ok(regex) => {
                    if let Some((_, bucket)) = groups.iter_mut().find(|(g, _)| *g == spec.group) {
                        bucket.push(CompiledPattern {
                            id: spec.id.clone(),
                            group: spec.group,
                            regex,
                            sub_category: spec.sub_category.clone(),
                            confidence: spec.confidence,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern_id = %spec.id, error = %e, "pattern failed to compile, disabling");
                    disabled.push(DisabledPattern { id: spec.id.clone(), reason: e.to_string() });
                }
            }
        }

        Self { groups, disabled }
    }

    /// True if every group in [`GROUP_ORDER`] has at least one compiled
    /// pattern — the precondition for a load to atomically replace the
    /// active set (§4.2).
    #[must_use]
    pub fn all_groups_non_empty(&self) -> bool {
        self.groups.iter().all(|(_, patterns)| !patterns.is_empty())
    }

    /// Evaluate groups highest-priority first, patterns within a group in
    /// declared order. First match wins.
    #[must_use]
    pub fn classify(&self, normalized_text: &str) -> Option<Classification> {
        for (group, patterns) in &self.groups {
            for pattern in patterns {
                if pattern.regex.is_match(normalized_text) {
                    return Some(Classification {
                        intent: group.intent(),
                        sub_category: pattern.sub_category.clone(),
                        confidence: pattern.confidence,
                        source: ClassificationSource::Pattern,
                        matched_pattern_id: Some(pattern.id.clone()),
                    });
                }
            }
        }
        None
    }
}

/// The built-in pattern seed (§9: "the built-in patterns are the initial
/// seed loaded into that same [declarative] set" — resolving the source's
/// dual pattern-list/YAML ambiguity in favor of a single authoritative
/// declarative set). Used when no pattern-set file exists yet, and as the
/// fallback if a file exists but fails to produce a complete set.
#[must_use]
pub fn builtin_seed() -> Vec<PatternSpec> {
    let p = |id: &str, group: PatternGroup, regex: &str, sub: &str, confidence: f32| PatternSpec {
        id: id.to_owned(),
        group,
        regex: regex.to_owned(),
        sub_category: sub.to_owned(),
        confidence,
        enabled: true,
    };
    vec![
        p("emg-fire", PatternGroup::Emergency, r"(?i)\b(fire|smoke)\b", "fire", 0.97),
        p("emg-intruder", PatternGroup::Emergency, r"(?i)\b(intruder|break[ -]?in)\b", "intruder", 0.97),
        p("emg-medical", PatternGroup::Emergency, r"(?i)\b(call (an )?ambulance|i('m| am) hurt|help.*(smoke|fire|hurt))\b", "medical", 0.95),
        p("inst-time", PatternGroup::Instant, r"(?i)^what('?s| is) the time|^what time is it", "time", 0.92),
        p("inst-date", PatternGroup::Instant, r"(?i)^what('?s| is) (the|today'?s) date|^what day is it", "date", 0.92),
        p("inst-joke", PatternGroup::Instant, r"(?i)^tell me a joke|^make me laugh", "joke", 0.9),
        p("inst-repeat", PatternGroup::Instant, r"(?i)^(say that again|repeat that|what did you say)", "repeat", 0.9),
        p("inst-math", PatternGroup::Instant, r"(?i)^what('?s| is) \d+\s*[+\-*/]\s*\d+", "arithmetic", 0.9),
        p("gest-wave", PatternGroup::Gesture, r"(?i)^wave (hello|goodbye|at me)", "wave", 0.85),
        p("gest-nod", PatternGroup::Gesture, r"(?i)^nod (your head|yes|no)", "nod", 0.85),
        p("act-switch", PatternGroup::Action, r"(?i)^turn (on|off) (the |my )?.+", "switch", 0.9),
        p("act-dim", PatternGroup::Action, r"(?i)^(dim|brighten|set) (the )?.+ (light|lights)", "dim", 0.88),
        p("act-lock", PatternGroup::Action, r"(?i)^(lock|unlock) (the )?.+", "lock", 0.9),
        p("act-climate", PatternGroup::Action, r"(?i)^set (the )?(thermostat|temperature) to \d+", "climate", 0.88),
        p("act-undo", PatternGroup::Action, r"(?i)^undo that|^undo (the )?(last|previous) (thing|action)", "undo", 0.9),
        p("mem-store", PatternGroup::Memory, r"(?i)^remember that\b", "store", 0.92),
        p("mem-recall", PatternGroup::Memory, r"(?i)^what('?s| is) my\b|^do you remember\b", "recall", 0.9),
        p("mem-forget", PatternGroup::Memory, r"(?i)^forget (that|about|what i said)\b", "forget", 0.9),
        p("qry-weather", PatternGroup::Query, r"(?i)\bweather\b", "weather", 0.82),
        p("qry-general", PatternGroup::Query, r"(?i)^(what|who|where|when|why|how)\b.*\?$", "general", 0.7),
    ]
}

/// Read and compile a pattern set from a declarative TOML file at `path`.
/// Returns the builtin seed, compiled, if the file does not yet exist —
/// the seed is the initial content of that authoritative set, not a
/// separate code path (§9).
pub fn load_or_seed(path: &Path) -> Result<PatternSet> {
    if !path.exists() {
        return Ok(PatternSet::compile(&builtin_seed()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::PatternSet(format!("reading {}: {e}", path.display())))?;
    let file: PatternFile = toml::from_str(&text).map_err(|e| CoreError::PatternSet(format!("parsing {}: {e}", path.display())))?;
    let set = PatternSet::compile(&file.patterns);
    if !set.all_groups_non_empty() {
        tracing::warn!(path = %path.display(), "pattern file missing one or more required groups, falling back to builtin seed");
        return Ok(PatternSet::compile(&builtin_seed()));
    }
    Ok(set)
}

/// Shared, read-mostly, atomically-swapped reference to the active pattern
/// set (§3 "pattern set ... replaced atomically").
#[derive(Debug)]
pub struct PatternStore {
    active: RwLock<Arc<PatternSet>>,
}

impl PatternStore {
    #[must_use]
    pub fn new(initial: PatternSet) -> Self {
        Self { active: RwLock::new(Arc::new(initial)) }
    }

    /// Take a cheap snapshot for the duration of one request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PatternSet> {
        Arc::clone(&self.active.read().expect("pattern store lock poisoned"))
    }

    /// Attempt to swap in a newly compiled set. Rejects (and retains the
    /// old set) if the candidate does not have every required group
    /// populated — swap-on-validate semantics (§3).
    pub fn try_swap(&self, candidate: PatternSet) -> Result<(), String> {
        if !candidate.all_groups_non_empty() {
            return Err("candidate pattern set is missing one or more required groups".into());
        }
        let mut guard = self.active.write().expect("pattern store lock poisoned");
        *guard = Arc::new(candidate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, group: PatternGroup, regex: &str, sub: &str, conf: f32) -> PatternSpec {
        PatternSpec {
            id: id.into(),
            group,
            regex: regex.into(),
            sub_category: sub.into(),
            confidence: conf,
            enabled: true,
        }
    }

    fn full_seed() -> Vec<PatternSpec> {
        vec![
            spec("emg-fire", PatternGroup::Emergency, r"(?i)smoke|fire|help", "fire", 0.95),
            spec("inst-time", PatternGroup::Instant, r"(?i)what time is it", "time", 0.9),
            spec("gest-wave", PatternGroup::Gesture, r"(?i)wave", "wave", 0.8),
            spec("act-lights", PatternGroup::Action, r"(?i)turn (on|off)", "switch", 0.85),
            spec("mem-remember", PatternGroup::Memory, r"(?i)remember that", "store", 0.9),
            spec("qry-weather", PatternGroup::Query, r"(?i)weather", "weather", 0.8),
        ]
    }

    #[test]
    fn compiles_all_groups_from_full_seed() {
        let set = PatternSet::compile(&full_seed());
        assert!(set.all_groups_non_empty());
        assert!(set.disabled.is_empty());
    }

    #[test]
    fn invalid_regex_is_disabled_not_fatal() {
        let mut specs = full_seed();
        specs.push(spec("bad", PatternGroup::Query, "(unterminated", "x", 0.5));
        let set = PatternSet::compile(&specs);
        assert_eq!(set.disabled.len(), 1);
        assert_eq!(set.disabled[0].id, "bad");
    }

    #[test]
    fn missing_group_fails_non_empty_check() {
        let specs: Vec<_> = full_seed().into_iter().filter(|s| s.group != PatternGroup::Query).collect();
        let set = PatternSet::compile(&specs);
        assert!(!set.all_groups_non_empty());
    }

    #[test]
    fn emergency_outranks_every_other_group() {
        let set = PatternSet::compile(&full_seed());
        // "help" also could be read as conversational, but Emergency must win.
        let c = set.classify("help there's smoke in the kitchen").expect("match");
        assert_eq!(c.intent, Intent::Emergency);
    }

    #[test]
    fn first_match_wins_within_group() {
        let specs = vec![
            spec("a", PatternGroup::Query, r"(?i)weather", "weather", 0.8),
            spec("b", PatternGroup::Query, r"(?i)weather today", "weather_today", 0.9),
        ];
        let mut full = full_seed();
        full.retain(|s| s.group != PatternGroup::Query);
        full.extend(specs);
        let set = PatternSet::compile(&full);
        let c = set.classify("weather today").expect("match");
        assert_eq!(c.matched_pattern_id.as_deref(), Some("a"));
    }

    #[test]
    fn no_match_returns_none() {
        let set = PatternSet::compile(&full_seed());
        assert!(set.classify("xyzzy plugh").is_none());
    }

    #[test]
    fn pattern_store_rejects_incomplete_swap_and_keeps_old() {
        let store = PatternStore::new(PatternSet::compile(&full_seed()));
        let incomplete: Vec<_> =
            full_seed().into_iter().filter(|s| s.group != PatternGroup::Emergency).collect();
        let result = store.try_swap(PatternSet::compile(&incomplete));
        assert!(result.is_err());
        // Old set must still answer for Emergency.
        let snap = store.snapshot();
        assert!(snap.classify("help fire").is_some());
    }

    #[test]
    fn pattern_store_accepts_complete_swap() {
        let store = PatternStore::new(PatternSet::compile(&full_seed()));
        let result = store.try_swap(PatternSet::compile(&full_seed()));
        assert!(result.is_ok());
    }

    #[test]
    fn builtin_seed_compiles_with_all_groups_populated() {
        let set = PatternSet::compile(&builtin_seed());
        assert!(set.all_groups_non_empty());
        assert!(set.disabled.is_empty());
    }

    #[test]
    fn load_or_seed_falls_back_to_builtin_for_missing_file() {
        let set = load_or_seed(std::path::Path::new("/nonexistent/barnabee-patterns.toml")).expect("load_or_seed");
        assert!(set.all_groups_non_empty());
    }

    fn group_snake_case(group: PatternGroup) -> &'static str {
        match group {
            PatternGroup::Emergency => "emergency",
            PatternGroup::Instant => "instant",
            PatternGroup::Gesture => "gesture",
            PatternGroup::Action => "action",
            PatternGroup::Memory => "memory",
            PatternGroup::Query => "query",
        }
    }

    #[test]
    fn load_or_seed_reads_a_complete_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("patterns.toml");
        let toml_specs: Vec<_> = full_seed()
            .into_iter()
            .map(|s| format!(
                "[[patterns]]\nid = \"{}\"\ngroup = \"{}\"\nregex = {:?}\nsub_category = \"{}\"\nconfidence = {}\n",
                s.id, group_snake_case(s.group), s.regex, s.sub_category, s.confidence
            ))
            .collect();
        std::fs::write(&path, toml_specs.join("\n")).expect("write");
        let set = load_or_seed(&path).expect("load_or_seed");
        assert!(set.all_groups_non_empty());
        assert!(set.classify("help fire").is_some());
    }

    #[test]
    fn group_rank_follows_group_order() {
        assert!(PatternGroup::Emergency.rank() < PatternGroup::Instant.rank());
        assert!(PatternGroup::Action.rank() < PatternGroup::Memory.rank());
        assert!(PatternGroup::Memory.rank() < PatternGroup::Query.rank());
    }
}

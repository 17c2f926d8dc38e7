//! Configuration surface for the orchestration core (§6).
//!
//! Mirrors the teacher's `SpeechConfig` layering: one `#[serde(default)]`
//! struct per concern, each with its own `impl Default`, loaded from a
//! single TOML file and merged over the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub classification: ClassificationConfig,
    pub deadlines: DeadlineConfig,
    pub memory: MemoryScoringConfig,
    pub patterns: PatternSetConfig,
    pub routing: RoutingConfig,
    pub overrides: OverrideConfig,
    pub logging: LoggingConfig,
    pub concurrency: ConcurrencyConfig,
    pub persona: PersonaConfig,
    pub conversation: ConversationConfig,
    pub safety: SafetyConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            classification: ClassificationConfig::default(),
            deadlines: DeadlineConfig::default(),
            memory: MemoryScoringConfig::default(),
            patterns: PatternSetConfig::default(),
            routing: RoutingConfig::default(),
            overrides: OverrideConfig::default(),
            logging: LoggingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            persona: PersonaConfig::default(),
            conversation: ConversationConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Classification thresholds (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub pattern_threshold: f32,
    pub heuristic_threshold: f32,
    pub model_fallback_enabled: bool,
    /// Intents the model classifier is never consulted for even when the
    /// heuristic confidence falls short.
    pub model_exempt_intents: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 0.85,
            heuristic_threshold: 0.7,
            model_fallback_enabled: true,
            model_exempt_intents: vec!["emergency".to_owned(), "instant".to_owned()],
        }
    }
}

/// Per-stage deadlines (§4.13), in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    pub total_ms: u64,
    pub classification_ms: u64,
    pub retrieval_ms: u64,
    pub model_classifier_ms: u64,
    pub handler_instant_ms: u64,
    pub handler_action_ms: u64,
    pub handler_conversation_ms: u64,
    pub handler_memory_op_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            total_ms: 4_000,
            classification_ms: 600,
            retrieval_ms: 300,
            model_classifier_ms: 500,
            handler_instant_ms: 50,
            handler_action_ms: 2_000,
            handler_conversation_ms: 3_000,
            handler_memory_op_ms: 500,
        }
    }
}

/// Weights and half-life for memory scoring and decay (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryScoringConfig {
    pub weight_semantic: f32,
    pub weight_importance: f32,
    pub weight_recency: f32,
    pub weight_access: f32,
    pub base_half_life_days: f32,
    pub minimum_floor: f32,
    pub archive_threshold: f32,
    pub delete_after_days: i64,
    pub reinforce_increment: f32,
    /// How often the maintenance pass (§4.7) runs.
    pub maintenance_interval_secs: u64,
}

impl Default for MemoryScoringConfig {
    fn default() -> Self {
        Self {
            weight_semantic: 0.40,
            weight_importance: 0.25,
            weight_recency: 0.20,
            weight_access: 0.15,
            base_half_life_days: 14.0,
            minimum_floor: 0.05,
            archive_threshold: 0.10,
            delete_after_days: 90,
            reinforce_increment: 0.15,
            maintenance_interval_secs: 86_400,
        }
    }
}

/// Where the declarative pattern set lives and whether it is hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSetConfig {
    pub path: String,
    pub hot_reload: bool,
}

impl Default for PatternSetConfig {
    fn default() -> Self {
        Self { path: crate::paths::pattern_set_file().to_string_lossy().into_owned(), hot_reload: true }
    }
}

/// Intent → handler routing table (hot-reloadable per §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Overrides the default intent→handler mapping for specific intents,
    /// keyed by the snake_case intent name.
    pub overrides: std::collections::HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { overrides: std::collections::HashMap::new() }
    }
}

/// User-, room-, and time-scoped override rules (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    pub path: String,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self { path: crate::paths::overrides_file().to_string_lossy().into_owned() }
    }
}

/// Ambient logging configuration (level filter, rotation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: crate::paths::logs_dir().to_string_lossy().into_owned(),
            rotation: "daily".to_owned(),
        }
    }
}

/// Backpressure and concurrency bounds (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_in_flight_requests: usize,
    pub undo_slot_depth: usize,
    /// Entity ids of the platform's fixed timer-entity pool (§4.9 timer
    /// verbs), acquired FIFO by the Action handler.
    pub timer_slot_ids: Vec<String>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: 32,
            undo_slot_depth: 5,
            timer_slot_ids: (1..=5).map(|n| format!("timer.assistant_{n}")).collect(),
        }
    }
}

/// Static persona text assembled into the Conversation handler's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub persona_block: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Barnabee".to_owned(),
            persona_block: "You are Barnabee, a calm and concise household voice assistant."
                .to_owned(),
        }
    }
}

/// Conversation-window summarization thresholds (§3, open question: the
/// token-budgeting constant is approximate upstream; here it is config).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub high_water_mark_tokens: usize,
    pub keep_tail_turns: usize,
    pub chars_per_token: usize,
    pub response_char_cap: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            high_water_mark_tokens: 1_500,
            keep_tail_turns: 6,
            chars_per_token: 4,
            response_char_cap: 600,
        }
    }
}

/// Safety Monitor configuration (§4.12): which speakers are treated as
/// minors, and the distress/abuse regex list scanned for when they speak.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub minors: Vec<String>,
    pub distress_patterns: Vec<String>,
    pub notification_channel: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            minors: Vec::new(),
            distress_patterns: vec![
                r"(?i)hurt me".to_owned(),
                r"(?i)please stop".to_owned(),
                r"(?i)i(?:'m| am) scared".to_owned(),
                r"(?i)don'?t tell (mom|dad|anyone)".to_owned(),
            ],
            notification_channel: "safety-alerts".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = CoreConfig::default();
        assert!((cfg.classification.pattern_threshold - 0.85).abs() < f32::EPSILON);
        assert!((cfg.classification.heuristic_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.deadlines.total_ms, 4_000);
        assert_eq!(cfg.deadlines.model_classifier_ms, 500);
        assert_eq!(cfg.concurrency.max_in_flight_requests, 32);
        assert_eq!(cfg.memory.delete_after_days, 90);
        assert!((cfg.memory.minimum_floor - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn memory_weights_sum_to_one() {
        let cfg = MemoryScoringConfig::default();
        let sum =
            cfg.weight_semantic + cfg.weight_importance + cfg.weight_recency + cfg.weight_access;
        assert!((sum - 1.0).abs() < 1e-6, "weights should sum to 1.0, got {sum}");
    }

    #[test]
    fn load_or_default_returns_defaults_for_missing_file() {
        let path = std::path::Path::new("/nonexistent/barnabee-test-config.toml");
        let cfg = CoreConfig::load_or_default(path).expect("load_or_default");
        assert_eq!(cfg.deadlines.total_ms, DeadlineConfig::default().total_ms);
    }

    #[test]
    fn load_parses_partial_toml_with_defaults_filled_in() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[classification]\npattern_threshold = 0.9\n").expect("write");

        let cfg = CoreConfig::load(&path).expect("load");
        assert!((cfg.classification.pattern_threshold - 0.9).abs() < f32::EPSILON);
        // Untouched sections still get their defaults.
        assert_eq!(cfg.deadlines.total_ms, 4_000);
    }

    #[test]
    fn load_rejects_missing_file() {
        let path = std::path::Path::new("/nonexistent/barnabee-test-config.toml");
        assert!(CoreError::Config("x".to_owned()).to_string().contains("config"));
        let _ = path;
    }
}

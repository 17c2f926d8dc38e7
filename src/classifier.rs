//! C4 Model Classifier and C5 Classifier Facade (§4.4, §4.5): the tiered
//! cascade C2 (pattern) → C3 (heuristic) → C4 (model), under an overall
//! deadline, always fails soft to `Classification::fallback()`.
//!
//! The model call's retry-before-fallback shape is grounded on the
//! teacher's `llm/fallback.rs::FallbackChain` retry policy (capped
//! attempts, backoff between transient failures) collapsed to a single
//! provider since the Model Classifier has exactly one collaborator.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{ClassificationConfig, DeadlineConfig};
use crate::error::{CoreError, Result};
use crate::interfaces::{ChatMessage, CompletionParams, LanguageModel, MessageRole};
use crate::model::{Classification, ClassificationSource, Intent};
use crate::pattern::PatternStore;

/// Retry attempts for a transient model-classifier failure before giving
/// up on this call (the overall deadline still bounds total wall time).
const RETRY_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct ModelClassification {
    intent: String,
    confidence: f32,
    #[serde(default)]
    sub_category: Option<String>,
}

fn parse_intent(s: &str) -> Option<Intent> {
    Some(match s.to_ascii_lowercase().as_str() {
        "instant" => Intent::Instant,
        "action" => Intent::Action,
        "query" => Intent::Query,
        "conversation" => Intent::Conversation,
        "memory" => Intent::Memory,
        "emergency" => Intent::Emergency,
        "gesture" => Intent::Gesture,
        "unknown" => Intent::Unknown,
        _ => return None,
    })
}

fn classification_prompt(normalized_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: MessageRole::System,
            content: "Classify the user's utterance into exactly one intent: \
                instant, action, query, conversation, memory, emergency, gesture, \
                or unknown. Respond with strict JSON only: \
                {\"intent\": \"...\", \"confidence\": 0.0-1.0, \"sub_category\": \"...\"}. \
                No prose, no markdown fences."
                .to_owned(),
        },
        ChatMessage { role: MessageRole::User, content: normalized_text.to_owned() },
    ]
}

/// Run the C4 Model Classifier once, with capped retry on transient
/// failure. Never propagates an error upward — malformed output,
/// out-of-range confidence, or exhausted retries all yield `None` so the
/// facade can fall back (§4.4: "classification never throws upward").
async fn classify_via_model(
    model: &dyn LanguageModel,
    normalized_text: &str,
) -> Option<Classification> {
    let messages = classification_prompt(normalized_text);
    let params = CompletionParams { model: "classifier".to_owned(), max_tokens: 64, temperature: 0.0 };

    let mut last_err: Option<CoreError> = None;
    for attempt in 0..=RETRY_ATTEMPTS {
        match model.complete(&messages, &params).await {
            Ok(text) => return parse_model_output(&text),
            Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                last_err = Some(e);
                tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "model classifier call failed");
                last_err = Some(e);
                break;
            }
        }
    }
    if let Some(e) = last_err {
        tracing::warn!(error = %e, "model classifier exhausted retries, falling back");
    }
    None
}

fn parse_model_output(text: &str) -> Option<Classification> {
    let trimmed = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let parsed: ModelClassification = serde_json::from_str(trimmed).ok()?;
    let intent = parse_intent(&parsed.intent)?;
    if !(0.0..=1.0).contains(&parsed.confidence) {
        return None;
    }
    Some(Classification {
        intent,
        sub_category: parsed.sub_category.unwrap_or_default(),
        confidence: parsed.confidence,
        source: ClassificationSource::Model,
        matched_pattern_id: None,
    })
}

/// C5 Classifier Facade: the single entry point the Orchestrator calls.
pub struct ClassifierFacade {
    patterns: Arc<PatternStore>,
    model: Option<Arc<dyn LanguageModel>>,
    classification: ClassificationConfig,
}

impl ClassifierFacade {
    #[must_use]
    pub fn new(
        patterns: Arc<PatternStore>,
        model: Option<Arc<dyn LanguageModel>>,
        classification: ClassificationConfig,
    ) -> Self {
        Self { patterns, model, classification }
    }

    /// Run the tiered cascade under `deadlines.classification_ms`. Always
    /// returns a `Classification` — never an error (§4.5: "if the facade
    /// exceeds its deadline, return (Conversation, 0.5, Fallback)").
    pub async fn classify(&self, normalized_text: &str, deadlines: &DeadlineConfig) -> Classification {
        if deadlines.classification_ms == 0 {
            return Classification::fallback();
        }
        let budget = Duration::from_millis(deadlines.classification_ms);
        match tokio::time::timeout(budget, self.classify_inner(normalized_text, deadlines)).await {
            Ok(c) => c,
            Err(_) => {
                tracing::warn!("classifier facade exceeded its deadline");
                Classification::fallback()
            }
        }
    }

    async fn classify_inner(&self, normalized_text: &str, deadlines: &DeadlineConfig) -> Classification {
        let snapshot = self.patterns.snapshot();
        if let Some(c) = snapshot.classify(normalized_text) {
            if c.confidence >= self.classification.pattern_threshold {
                return c;
            }
        }

        let heuristic = crate::heuristic::classify(normalized_text);
        if heuristic.confidence >= self.classification.heuristic_threshold {
            return heuristic;
        }

        let intent_name = format!("{:?}", heuristic.intent).to_ascii_lowercase();
        let exempt = self.classification.model_exempt_intents.iter().any(|i| i == &intent_name);

        if self.classification.model_fallback_enabled && !exempt {
            if let Some(model) = &self.model {
                let model_budget = Duration::from_millis(deadlines.model_classifier_ms);
                let result = tokio::time::timeout(model_budget, classify_via_model(model.as_ref(), normalized_text)).await;
                if let Ok(Some(c)) = result {
                    return c;
                }
            }
        }

        heuristic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{PatternGroup, PatternSet, PatternSpec};
    use async_trait::async_trait;

    fn seed_patterns() -> PatternSet {
        PatternSet::compile(&[
            PatternSpec { id: "emg".into(), group: PatternGroup::Emergency, regex: "(?i)fire".into(), sub_category: "fire".into(), confidence: 0.95, enabled: true },
            PatternSpec { id: "inst".into(), group: PatternGroup::Instant, regex: "(?i)what time".into(), sub_category: "time".into(), confidence: 0.9, enabled: true },
            PatternSpec { id: "gest".into(), group: PatternGroup::Gesture, regex: "(?i)wave".into(), sub_category: "wave".into(), confidence: 0.8, enabled: true },
            PatternSpec { id: "act".into(), group: PatternGroup::Action, regex: "(?i)turn on".into(), sub_category: "switch".into(), confidence: 0.9, enabled: true },
            PatternSpec { id: "mem".into(), group: PatternGroup::Memory, regex: "(?i)remember that".into(), sub_category: "store".into(), confidence: 0.9, enabled: true },
            PatternSpec { id: "qry".into(), group: PatternGroup::Query, regex: "(?i)weather".into(), sub_category: "weather".into(), confidence: 0.8, enabled: true },
        ])
    }

    struct StubModel {
        response: String,
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn complete(&self, _messages: &[ChatMessage], _params: &CompletionParams) -> Result<String> {
            Ok(self.response.clone())
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
    }

    fn facade(model: Option<Arc<dyn LanguageModel>>) -> ClassifierFacade {
        ClassifierFacade::new(Arc::new(PatternStore::new(seed_patterns())), model, ClassificationConfig::default())
    }

    #[tokio::test]
    async fn high_confidence_pattern_short_circuits() {
        let f = facade(None);
        let c = f.classify("turn on the lights", &DeadlineConfig::default()).await;
        assert_eq!(c.intent, Intent::Action);
        assert_eq!(c.source, ClassificationSource::Pattern);
    }

    #[tokio::test]
    async fn falls_through_to_heuristic_when_pattern_misses() {
        let f = facade(None);
        let c = f.classify("what is going on today", &DeadlineConfig::default()).await;
        assert_eq!(c.source, ClassificationSource::Heuristic);
    }

    #[tokio::test]
    async fn model_is_consulted_when_heuristic_is_unconfident() {
        let model: Arc<dyn LanguageModel> = Arc::new(StubModel {
            response: r#"{"intent":"query","confidence":0.92,"sub_category":"trivia"}"#.into(),
        });
        let f = facade(Some(model));
        let c = f.classify("tell me something obscure", &DeadlineConfig::default()).await;
        assert_eq!(c.intent, Intent::Query);
        assert_eq!(c.source, ClassificationSource::Model);
    }

    #[tokio::test]
    async fn malformed_model_output_falls_back_to_heuristic() {
        let model: Arc<dyn LanguageModel> = Arc::new(StubModel { response: "not json".into() });
        let f = facade(Some(model));
        let c = f.classify("tell me something obscure", &DeadlineConfig::default()).await;
        assert_eq!(c.source, ClassificationSource::Heuristic);
    }

    #[tokio::test]
    async fn emergency_pattern_never_consults_model() {
        let model: Arc<dyn LanguageModel> = Arc::new(StubModel {
            response: r#"{"intent":"conversation","confidence":0.99}"#.into(),
        });
        let f = facade(Some(model));
        let c = f.classify("fire fire", &DeadlineConfig::default()).await;
        assert_eq!(c.intent, Intent::Emergency);
    }

    #[tokio::test]
    async fn zero_deadline_yields_fallback() {
        let model: Arc<dyn LanguageModel> = Arc::new(StubModel {
            response: r#"{"intent":"query","confidence":0.9}"#.into(),
        });
        let f = facade(Some(model));
        let mut deadlines = DeadlineConfig::default();
        deadlines.classification_ms = 0;
        let c = f.classify("tell me something obscure", &deadlines).await;
        assert_eq!(c.source, ClassificationSource::Fallback);
    }
}

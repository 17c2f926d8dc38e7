//! C3 Heuristic Classifier — ordered, short-circuit keyword/shape rules
//! run only when the Pattern Matcher returns no match (§4.3).

use crate::model::{Classification, ClassificationSource, Intent};

const COMMAND_VERBS: &[&str] =
    &["turn", "switch", "set", "dim", "lock", "unlock", "open", "close", "start", "stop", "play", "pause"];

const WH_WORDS: &[&str] = &["what", "when", "where", "who", "why", "how", "which", "is", "are", "do", "does"];

const MEMORY_KEYWORDS: &[&str] = &["remember", "forget", "what is my", "what's my"];

/// Run the ordered rule cascade over normalized text. Always returns a
/// classification — the final rule is an unconditional fallback to
/// `Conversation` at confidence 0.5.
#[must_use]
pub fn classify(normalized_text: &str) -> Classification {
    if let Some(c) = memory_keyword_rule(normalized_text) {
        return c;
    }
    if let Some(c) = verb_form_rule(normalized_text) {
        return c;
    }
    if let Some(c) = interrogative_rule(normalized_text) {
        return c;
    }
    fallback_rule()
}

fn first_token(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

fn verb_form_rule(text: &str) -> Option<Classification> {
    let token = first_token(text)?;
    if COMMAND_VERBS.contains(&token) {
        return Some(Classification {
            intent: Intent::Action,
            sub_category: "heuristic_verb".into(),
            confidence: 0.65,
            source: ClassificationSource::Heuristic,
            matched_pattern_id: None,
        });
    }
    None
}

fn interrogative_rule(text: &str) -> Option<Classification> {
    let token = first_token(text)?;
    if WH_WORDS.contains(&token) || text.trim_end().ends_with('?') {
        return Some(Classification {
            intent: Intent::Query,
            sub_category: "heuristic_interrogative".into(),
            confidence: 0.6,
            source: ClassificationSource::Heuristic,
            matched_pattern_id: None,
        });
    }
    None
}

fn memory_keyword_rule(text: &str) -> Option<Classification> {
    if MEMORY_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(Classification {
            intent: Intent::Memory,
            sub_category: "heuristic_memory_keyword".into(),
            confidence: 0.75,
            source: ClassificationSource::Heuristic,
            matched_pattern_id: None,
        });
    }
    None
}

fn fallback_rule() -> Classification {
    Classification {
        intent: Intent::Conversation,
        sub_category: "heuristic_fallback".into(),
        confidence: 0.5,
        source: ClassificationSource::Heuristic,
        matched_pattern_id: None,
    }
}

//! C1 Preprocessor — normalizes a raw utterance for the classification
//! cascade while preserving the original text for handlers that need to
//! quote it back. Grounded on the ordered, short-circuit stripping style of
//! the teacher's voice-command prefix parsing.

const WAKE_TOKENS: &[&str] = &["hey barnabee", "barnabee"];
const POLITENESS_PREFIXES: &[&str] = &["could you please", "can you please", "would you please", "could you", "can you", "would you", "please"];

/// The normalized form of an utterance alongside the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub raw: String,
    pub text: String,
}

/// Normalize `raw` per §4.1: strip a leading wake token and optional
/// separator, strip one leading politeness prefix, collapse internal
/// whitespace, strip trailing terminal punctuation, and lower-case.
#[must_use]
pub fn normalize(raw: &str) -> Normalized {
    let mut s = raw.trim().to_owned();
    s = strip_wake_token(&s);
    s = s.trim().to_owned();
    s = strip_politeness_prefix(&s);
    s = collapse_whitespace(&s);
    s = strip_trailing_punctuation(&s);
    let text = s.to_lowercase();
    Normalized { raw: raw.to_owned(), text }
}

fn strip_wake_token(s: &str) -> String {
    let lower = s.to_lowercase();
    for token in WAKE_TOKENS {
        if let Some(rest) = lower.strip_prefix(token) {
            let consumed = s.len() - rest.len();
            let mut remainder = s[consumed..].to_owned();
            remainder = strip_leading_separator(&remainder);
            return remainder;
        }
    }
    s.to_owned()
}

fn strip_leading_separator(s: &str) -> String {
    let trimmed = s.trim_start();
    trimmed
        .strip_prefix(',')
        .or_else(|| trimmed.strip_prefix('.'))
        .unwrap_or(trimmed)
        .trim_start()
        .to_owned()
}

fn strip_politeness_prefix(s: &str) -> String {
    let lower = s.to_lowercase();
    // Longest prefixes are listed first so "could you please" is removed
    // whole rather than leaving a dangling "please".
    for prefix in POLITENESS_PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            let consumed = s.len() - rest.len();
            return s[consumed..].trim_start().to_owned();
        }
    }
    s.to_owned()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_trailing_punctuation(s: &str) -> String {
    s.trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':')).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wake_token_with_comma() {
        let n = normalize("Barnabee, turn on the lights");
        assert_eq!(n.text, "turn on the lights");
    }

    #[test]
    fn strips_hey_barnabee_prefix() {
        let n = normalize("Hey Barnabee what time is it");
        assert_eq!(n.text, "what time is it");
    }

    #[test]
    fn strips_single_politeness_prefix_only_once() {
        let n = normalize("could you please turn on the kitchen light");
        assert_eq!(n.text, "turn on the kitchen light");
    }

    #[test]
    fn collapses_internal_whitespace() {
        let n = normalize("turn   on    the  lights");
        assert_eq!(n.text, "turn on the lights");
    }

    #[test]
    fn strips_trailing_punctuation() {
        let n = normalize("what time is it?");
        assert_eq!(n.text, "what time is it");
    }

    #[test]
    fn preserves_raw_alongside_normalized() {
        let n = normalize("Barnabee, What Time Is It?");
        assert_eq!(n.raw, "Barnabee, What Time Is It?");
        assert_eq!(n.text, "what time is it");
    }

    #[test]
    fn empty_input_normalizes_to_empty() {
        let n = normalize("");
        assert_eq!(n.text, "");
    }

    #[test]
    fn no_wake_token_leaves_text_intact_besides_case() {
        let n = normalize("Turn off the lights");
        assert_eq!(n.text, "turn off the lights");
    }

    #[test]
    fn unicode_input_does_not_panic() {
        let n = normalize("café ☕ turn on the lights");
        assert!(n.text.contains("turn on the lights"));
    }
}

//! C8 Handler: Instant (§4.8). Pure-function template dispatch on
//! sub_category; never touches the network. Latency target ≤ 5 ms.
//!
//! Grounded on the teacher's `voice_command.rs` prefix-matching idiom:
//! plain string inspection rather than regex, ordered short-circuit rules.

use chrono::{Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::HandlerResult;

const JOKES: &[&str] = &[
    "Why did the smart light file a complaint? It felt dimmed out.",
    "I'd tell you a UDP joke, but you might not get it.",
    "Why do thermostats make terrible comedians? Their delivery is always flat.",
    "I asked the lock for its secret. It kept it under key.",
];

const FACTS: &[&str] = &[
    "Honey never spoils if stored properly.",
    "Octopuses have three hearts.",
    "A bolt of lightning is hotter than the surface of the sun.",
    "Bananas are botanically berries; strawberries are not.",
];

/// Dispatch an Instant-intent request by `sub_category`. `request_id` seeds
/// the jokes/facts pick deterministically so tests are reproducible; `repeat_slot`
/// holds the previous turn's response text for the "repeat that" sub-category.
#[must_use]
pub fn handle(sub_category: &str, raw_utterance: &str, request_id: &str, repeat_slot: Option<&str>) -> HandlerResult {
    match sub_category {
        "time" => time_response(),
        "date" => date_response(),
        "joke" => HandlerResult::ok(pick_deterministic(JOKES, request_id)),
        "fact" => HandlerResult::ok(pick_deterministic(FACTS, request_id)),
        "repeat" => repeat_response(repeat_slot),
        "arithmetic" => arithmetic_response(raw_utterance),
        "unit_conversion" => unit_conversion_response(raw_utterance),
        other => HandlerResult::graceful_failure(
            "I'm not sure how to answer that instantly.",
            format!("unknown instant sub_category: {other}"),
        ),
    }
}

fn time_response() -> HandlerResult {
    let now = Local::now();
    let (is_pm, hour12) = now.hour12();
    let suffix = if is_pm { "PM" } else { "AM" };
    HandlerResult::ok(format!("It's {hour12}:{:02} {suffix}.", now.minute()))
}

fn date_response() -> HandlerResult {
    let now = Local::now();
    HandlerResult::ok(format!("Today is {}.", now.format("%A, %B %-d")))
}

fn repeat_response(repeat_slot: Option<&str>) -> HandlerResult {
    match repeat_slot {
        Some(text) if !text.is_empty() => HandlerResult::ok(text.to_owned()),
        _ => HandlerResult::graceful_failure(
            "I don't have anything to repeat yet.",
            "repeat slot empty",
        ),
    }
}

/// Picks an entry from `bag` using an RNG seeded from `request_id`, so the
/// same request id always yields the same pick (tests stay reproducible)
/// while repeated requests from a live speaker still feel varied.
fn pick_deterministic(bag: &[&str], request_id: &str) -> String {
    let seed = request_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    let mut rng = StdRng::seed_from_u64(seed);
    bag[rng.gen_range(0..bag.len())].to_owned()
}

/// Extremely small arithmetic handler: `N plus/minus/times/divided by M`.
fn arithmetic_response(raw: &str) -> HandlerResult {
    let lower = raw.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let op_words = [("plus", '+'), ("minus", '-'), ("times", '*'), ("divided", '/')];

    for (word, op) in op_words {
        if let Some(pos) = tokens.iter().position(|t| *t == word) {
            let left: Option<f64> = tokens.get(pos.wrapping_sub(1)).and_then(|t| t.parse().ok());
            let right: Option<f64> = tokens
                .iter()
                .skip(pos + 1)
                .find_map(|t| t.parse::<f64>().ok());
            if let (Some(l), Some(r)) = (left, right) {
                let result = match op {
                    '+' => l + r,
                    '-' => l - r,
                    '*' => l * r,
                    '/' if r != 0.0 => l / r,
                    '/' => return HandlerResult::graceful_failure("I can't divide by zero.", "division by zero"),
                    _ => unreachable!(),
                };
                return HandlerResult::ok(format_number(result));
            }
        }
    }
    HandlerResult::graceful_failure("I couldn't work out that calculation.", "arithmetic parse failure")
}

fn format_number(n: f64) -> String {
    if (n.fract()).abs() < f64::EPSILON {
        format!("{}", n as i64)
    } else {
        format!("{n:.2}")
    }
}

/// Units this handler knows how to convert between. Direction is decided
/// by word order around `"to"` — the source unit is the one associated
/// with the numeric value (before `"to"`), the target unit is the one
/// named after it — never by mere co-occurrence of both words, which
/// cannot distinguish "celsius to fahrenheit" from "fahrenheit to celsius".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Celsius,
    Fahrenheit,
    Miles,
    Kilometers,
}

impl Unit {
    fn from_token(token: &str) -> Option<Self> {
        match token.trim_end_matches(|c: char| matches!(c, '.' | ',' | '?' | '!')) {
            "celsius" | "c" => Some(Unit::Celsius),
            "fahrenheit" | "f" => Some(Unit::Fahrenheit),
            "miles" | "mile" | "mi" => Some(Unit::Miles),
            "kilometers" | "kilometres" | "km" | "kilometer" | "kilometre" => Some(Unit::Kilometers),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Unit::Celsius => "Celsius",
            Unit::Fahrenheit => "Fahrenheit",
            Unit::Miles => "miles",
            Unit::Kilometers => "kilometers",
        }
    }
}

fn convert(value: f64, from: Unit, to: Unit) -> Option<f64> {
    match (from, to) {
        (Unit::Celsius, Unit::Fahrenheit) => Some(value * 9.0 / 5.0 + 32.0),
        (Unit::Fahrenheit, Unit::Celsius) => Some((value - 32.0) * 5.0 / 9.0),
        (Unit::Miles, Unit::Kilometers) => Some(value * 1.60934),
        (Unit::Kilometers, Unit::Miles) => Some(value / 1.60934),
        _ => None,
    }
}

fn unit_conversion_response(raw: &str) -> HandlerResult {
    let lower = raw.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let value: Option<f64> = tokens.iter().find_map(|t| t.parse::<f64>().ok());
    let Some(value) = value else {
        return HandlerResult::graceful_failure("I need a number to convert.", "no numeric value found");
    };

    let Some(to_pos) = tokens.iter().position(|t| *t == "to") else {
        return HandlerResult::graceful_failure("I don't know that conversion yet.", "no 'to' separator found");
    };
    let from_unit = tokens[..to_pos].iter().rev().find_map(|t| Unit::from_token(t));
    let to_unit = tokens[to_pos + 1..].iter().find_map(|t| Unit::from_token(t));

    match (from_unit, to_unit) {
        (Some(from), Some(to)) => match convert(value, from, to) {
            Some(result) => HandlerResult::ok(format!("{:.1} {}.", result, to.label())),
            None => HandlerResult::graceful_failure("I don't know that conversion yet.", "unsupported unit pair"),
        },
        _ => HandlerResult::graceful_failure("I don't know that conversion yet.", "unrecognized units"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HandlerStatus;

    #[test]
    fn time_response_contains_colon() {
        let r = handle("time", "what time is it", "req-1", None);
        assert_eq!(r.status, HandlerStatus::Ok);
        assert!(r.text.contains(':'));
    }

    #[test]
    fn date_response_is_ok() {
        let r = handle("date", "what's the date", "req-1", None);
        assert_eq!(r.status, HandlerStatus::Ok);
    }

    #[test]
    fn joke_pick_is_deterministic_per_request_id() {
        let a = handle("joke", "tell me a joke", "req-stable", None);
        let b = handle("joke", "tell me a joke", "req-stable", None);
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn repeat_with_empty_slot_is_graceful_failure() {
        let r = handle("repeat", "say that again", "req-1", None);
        assert_eq!(r.status, HandlerStatus::GracefulFailure);
    }

    #[test]
    fn repeat_with_filled_slot_echoes_it() {
        let r = handle("repeat", "say that again", "req-1", Some("it's sunny"));
        assert_eq!(r.text, "it's sunny");
    }

    #[test]
    fn arithmetic_addition() {
        let r = handle("arithmetic", "what is 2 plus 2", "req-1", None);
        assert_eq!(r.text, "4");
    }

    #[test]
    fn arithmetic_division_by_zero_is_graceful() {
        let r = handle("arithmetic", "what is 4 divided by 0", "req-1", None);
        assert_eq!(r.status, HandlerStatus::GracefulFailure);
    }

    #[test]
    fn unit_conversion_celsius_to_fahrenheit() {
        let r = handle("unit_conversion", "convert 100 celsius to fahrenheit", "req-1", None);
        assert!(r.text.contains("212"));
    }

    #[test]
    fn unit_conversion_fahrenheit_to_celsius() {
        let r = handle("unit_conversion", "convert 100 fahrenheit to celsius", "req-1", None);
        assert!(r.text.contains("37.8"));
        assert!(r.text.contains("Celsius"));
    }

    #[test]
    fn unit_conversion_kilometers_to_miles() {
        let r = handle("unit_conversion", "convert 5 kilometers to miles", "req-1", None);
        assert!(r.text.contains("3.1"));
        assert!(r.text.contains("miles"));
    }

    #[test]
    fn unit_conversion_miles_to_kilometers() {
        let r = handle("unit_conversion", "convert 5 miles to kilometers", "req-1", None);
        assert!(r.text.contains("8.0"));
        assert!(r.text.contains("kilometers"));
    }

    #[test]
    fn unknown_sub_category_is_graceful_failure() {
        let r = handle("nonsense", "blah", "req-1", None);
        assert_eq!(r.status, HandlerStatus::GracefulFailure);
    }

    #[test]
    fn latency_budget_is_trivially_met_by_pure_computation() {
        let start = std::time::Instant::now();
        let _ = handle("time", "what time is it", "req-1", None);
        assert!(start.elapsed().as_millis() < 5);
    }
}

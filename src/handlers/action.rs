//! C9 Handler: Action (§4.9). Parses compound commands, resolves target
//! entities against the smart-home registry, snapshots prior state into
//! the Undo Slot, dispatches service calls concurrently, and reports a
//! combined natural-language summary.
//!
//! Entity resolution's fuzzy-match step is grounded on the teacher's
//! plain-string, no-dependency parsing style (`voice_command.rs`); the
//! concurrent fan-out/rejoin over sibling tasks follows the "Nested async
//! fan-out in Action handler" re-architecture note in §9 — modeled as a
//! bounded task group joined with `futures_util::future::join_all`, the
//! same fan-out/rejoin primitive the teacher's provider adapters use for
//! concurrent sibling calls, rather than the source's nested per-call
//! spawns. Timer acquisition is grounded on the teacher's `RateLimiter`
//! shape (`channels/rate_limit.rs`): a small bounded-resource struct
//! behind a mutex with FIFO semantics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde_json::Value;

use crate::interfaces::SmartHomePlatform;
use crate::model::{ActionKind, EntityReference, HandlerResult, UndoEntry, UndoSlot};

/// Fixed pool of platform timer entity slots. Acquisition is FIFO;
/// release on completion or cancellation (§4.9, §5: "a slot is never
/// double-acquired").
#[derive(Debug)]
pub struct TimerPool {
    free: Mutex<VecDeque<String>>,
}

impl TimerPool {
    #[must_use]
    pub fn new(slot_names: Vec<String>) -> Self {
        Self { free: Mutex::new(slot_names.into_iter().collect()) }
    }

    /// Acquire the next free slot, if any.
    pub fn acquire(&self) -> Option<String> {
        self.free.lock().expect("lock").pop_front()
    }

    /// Return a slot to the back of the pool.
    pub fn release(&self, slot: String) {
        self.free.lock().expect("lock").push_back(slot);
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().expect("lock").len()
    }
}

/// One resolved, parsed clause ready to dispatch.
struct ParsedClause {
    verb: Verb,
    raw_targets: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    TurnOn,
    TurnOff,
    Lock,
    Unlock,
    Open,
    Close,
    /// "set the <thermostat> to <N> degrees" — setpoint in tenths of a
    /// degree so the verb stays `Eq` (no floats in the variant).
    SetClimate { setpoint_tenths: i32 },
    Dim { percent: u8 },
    Brighten { percent: u8 },
    StartTimer { minutes: u64 },
    CancelTimer,
}

const COORDINATORS: &[&str] = &[" and ", ", "];

/// Split a normalized utterance on coordinating conjunctions, preserving
/// the leading verb into clauses that omit their own (§4.9 step 1).
fn split_compound(text: &str) -> Vec<ParsedClause> {
    let mut clauses_raw: Vec<String> = vec![text.to_owned()];
    for sep in COORDINATORS {
        clauses_raw = clauses_raw.into_iter().flat_map(|c| c.split(sep).map(str::to_owned).collect::<Vec<_>>()).collect();
    }

    let mut last_verb: Option<Verb> = None;
    let mut out = Vec::new();
    for clause in clauses_raw {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if let Some((verb, rest)) = extract_verb(clause) {
            last_verb = Some(verb);
            out.push(ParsedClause { verb, raw_targets: rest.to_owned() });
        } else if let Some(verb) = last_verb {
            out.push(ParsedClause { verb, raw_targets: clause.to_owned() });
        }
    }
    out
}

/// First whitespace-delimited token in `s` that parses as a number.
fn parse_leading_number(s: &str) -> Option<f64> {
    s.split_whitespace().find_map(|t| t.trim_end_matches(|c: char| matches!(c, '.' | ',' | '?' | '!')).parse::<f64>().ok())
}

/// Split a `dim`/`brighten` rest phrase into its target and an optional
/// trailing "by N percent" step, defaulting to `default_percent`.
fn split_target_and_amount(rest: &str, default_percent: u8) -> (&str, u8) {
    if let Some(pos) = rest.find(" by ") {
        let target = &rest[..pos];
        let percent = parse_leading_number(&rest[pos + 4..]).map(|v| v as u8).unwrap_or(default_percent);
        (target.trim(), percent)
    } else {
        (rest.trim(), default_percent)
    }
}

const DEFAULT_DIM_STEP_PERCENT: u8 = 20;
const DEFAULT_TIMER_MINUTES: u64 = 5;

fn extract_verb(clause: &str) -> Option<(Verb, &str)> {
    for prefix in ["start a timer for ", "set a timer for ", "start timer for "] {
        if let Some(rest) = clause.strip_prefix(prefix) {
            let minutes = parse_leading_number(rest).map(|v| v as u64).unwrap_or(DEFAULT_TIMER_MINUTES);
            return Some((Verb::StartTimer { minutes }, ""));
        }
    }
    for prefix in ["cancel the timer", "cancel timer"] {
        if let Some(rest) = clause.strip_prefix(prefix) {
            return Some((Verb::CancelTimer, rest.trim()));
        }
    }
    if let Some(rest) = clause.strip_prefix("set ") {
        let pos = rest.find(" to ")?;
        let target = &rest[..pos];
        let degrees = parse_leading_number(&rest[pos + 4..])?;
        return Some((Verb::SetClimate { setpoint_tenths: (degrees * 10.0).round() as i32 }, target.trim()));
    }
    if let Some(rest) = clause.strip_prefix("dim ") {
        let (target, percent) = split_target_and_amount(rest, DEFAULT_DIM_STEP_PERCENT);
        return Some((Verb::Dim { percent }, target));
    }
    if let Some(rest) = clause.strip_prefix("brighten ") {
        let (target, percent) = split_target_and_amount(rest, DEFAULT_DIM_STEP_PERCENT);
        return Some((Verb::Brighten { percent }, target));
    }

    const VERBS: &[(&str, Verb)] = &[
        ("turn on", Verb::TurnOn),
        ("switch on", Verb::TurnOn),
        ("turn off", Verb::TurnOff),
        ("switch off", Verb::TurnOff),
        ("lock", Verb::Lock),
        ("unlock", Verb::Unlock),
        ("open", Verb::Open),
        ("close", Verb::Close),
    ];
    for (prefix, verb) in VERBS {
        if let Some(rest) = clause.strip_prefix(prefix) {
            return Some((*verb, rest.trim()));
        }
    }
    None
}

fn domain_service(verb: Verb, domain: &str) -> (&'static str, &'static str) {
    match verb {
        Verb::TurnOn => (domain_static(domain), "turn_on"),
        Verb::TurnOff => (domain_static(domain), "turn_off"),
        Verb::Lock => ("lock", "lock"),
        Verb::Unlock => ("lock", "unlock"),
        Verb::Open => ("cover", "open_cover"),
        Verb::Close => ("cover", "close_cover"),
        Verb::SetClimate { .. } => ("climate", "set_temperature"),
        Verb::Dim { .. } | Verb::Brighten { .. } => ("light", "turn_on"),
        Verb::StartTimer { .. } | Verb::CancelTimer => ("timer", "start"),
    }
}

/// Service-call payload for verbs that carry their own numeric parameter.
/// `prior_state` supplies the baseline `Dim`/`Brighten` steps relative from.
fn service_call_data(verb: Verb, prior_state: &Value) -> Value {
    match verb {
        Verb::SetClimate { setpoint_tenths } => serde_json::json!({"temperature": setpoint_tenths as f64 / 10.0}),
        Verb::Dim { percent } => {
            let current = prior_state.get("brightness_pct").and_then(Value::as_u64).unwrap_or(100);
            let new = current.saturating_sub(u64::from(percent));
            serde_json::json!({"brightness_pct": new})
        }
        Verb::Brighten { percent } => {
            let current = prior_state.get("brightness_pct").and_then(Value::as_u64).unwrap_or(0);
            let new = (current + u64::from(percent)).min(100);
            serde_json::json!({"brightness_pct": new})
        }
        _ => serde_json::json!({}),
    }
}

fn domain_static(domain: &str) -> &'static str {
    match domain {
        "light" => "light",
        "climate" => "climate",
        "cover" => "cover",
        "lock" => "lock",
        _ => "light",
    }
}

/// Levenshtein edit distance, used for fuzzy entity-name matching
/// (§4.9: "edit distance ≤ 2, case-insensitive").
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut cur = vec![0; b.len() + 1];
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        prev = cur;
    }
    prev[b.len()]
}

/// Resolve a target phrase against the entity registry: exact name, fuzzy
/// name (edit distance ≤ 2), or area expansion ("lights in kitchen").
fn resolve_targets(phrase: &str, registry: &[EntityReference]) -> Vec<EntityReference> {
    let phrase = phrase.to_lowercase();
    let phrase_trimmed = phrase.trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?'));
    let phrase_trimmed = phrase_trimmed
        .strip_prefix("the ")
        .or_else(|| phrase_trimmed.strip_prefix("a "))
        .or_else(|| phrase_trimmed.strip_prefix("an "))
        .unwrap_or(phrase_trimmed);

    // Area expansion: "... in <area>" or "<area> lights".
    for entity in registry {
        if let Some(area) = &entity.area {
            let area_lc = area.to_lowercase();
            if phrase_trimmed.contains(&format!("in {area_lc}")) || phrase_trimmed.starts_with(&area_lc) {
                let matches: Vec<EntityReference> = registry
                    .iter()
                    .filter(|e| e.area.as_deref().map(str::to_lowercase).as_deref() == Some(area_lc.as_str()))
                    .cloned()
                    .collect();
                if !matches.is_empty() {
                    return matches;
                }
            }
        }
    }

    // Floor expansion: "... on <floor>" or "<floor> lights" (§4.9 step 2).
    for entity in registry {
        if let Some(floor) = &entity.floor {
            let floor_lc = floor.to_lowercase();
            if phrase_trimmed.contains(&format!("on {floor_lc}")) || phrase_trimmed.starts_with(&floor_lc) {
                let matches: Vec<EntityReference> = registry
                    .iter()
                    .filter(|e| e.floor.as_deref().map(str::to_lowercase).as_deref() == Some(floor_lc.as_str()))
                    .cloned()
                    .collect();
                if !matches.is_empty() {
                    return matches;
                }
            }
        }
    }

    // Named-group expansion: "the <group>" where <group> is a platform-
    // defined entity group, e.g. "the reading lights" (§4.9 step 2).
    for entity in registry {
        for group in &entity.groups {
            let group_lc = group.to_lowercase();
            if phrase_trimmed == group_lc || phrase_trimmed.contains(&group_lc) {
                let matches: Vec<EntityReference> = registry
                    .iter()
                    .filter(|e| e.groups.iter().any(|g| g.to_lowercase() == group_lc))
                    .cloned()
                    .collect();
                if !matches.is_empty() {
                    return matches;
                }
            }
        }
    }

    // Exact match on display name or id.
    let exact: Vec<EntityReference> = registry
        .iter()
        .filter(|e| {
            e.display_name.to_lowercase() == phrase_trimmed || e.entity_id.to_lowercase() == phrase_trimmed
        })
        .cloned()
        .collect();
    if !exact.is_empty() {
        return exact;
    }

    // Fuzzy match on display name.
    let mut best: Option<(usize, EntityReference)> = None;
    for entity in registry {
        let dist = edit_distance(&entity.display_name.to_lowercase(), phrase_trimmed);
        if dist <= 2 && best.as_ref().is_none_or(|(d, _)| dist < *d) {
            best = Some((dist, entity.clone()));
        }
    }
    best.into_iter().map(|(_, e)| e).collect()
}

/// Capture the state to restore to on undo, from the state observed
/// *before* the new action is dispatched (§4.9: "undo restores the prior
/// state, not the inverse of the verb just issued").
fn snapshot_for_undo(verb: Verb, prior_state: &Value) -> ActionKind {
    match verb {
        Verb::TurnOn | Verb::TurnOff => {
            let was_on = prior_state.get("state").and_then(Value::as_str) == Some("on");
            if was_on {
                let brightness = prior_state.get("brightness").and_then(Value::as_u64).map(|v| v as u8);
                let color = prior_state.get("color").and_then(Value::as_str).map(str::to_owned);
                let color_temp = prior_state.get("color_temp").and_then(Value::as_u64).map(|v| v as u32);
                ActionKind::LightSet { brightness, color, color_temp }
            } else {
                ActionKind::LightOff
            }
        }
        Verb::Lock | Verb::Unlock => {
            let locked = prior_state.get("state").and_then(Value::as_str) == Some("locked");
            ActionKind::LockSet { locked }
        }
        Verb::Open | Verb::Close => {
            let position = prior_state.get("position").and_then(Value::as_u64).map(|v| v as u8);
            ActionKind::CoverSet { position }
        }
        Verb::SetClimate { .. } => {
            let setpoint = prior_state.get("temperature").and_then(Value::as_f64).map(|v| v as f32);
            let mode = prior_state.get("mode").and_then(Value::as_str).map(str::to_owned);
            let fan = prior_state.get("fan_mode").and_then(Value::as_str).map(str::to_owned);
            ActionKind::ClimateSet { setpoint, mode, fan }
        }
        Verb::Dim { .. } | Verb::Brighten { .. } => {
            let brightness = prior_state.get("brightness").and_then(Value::as_u64).map(|v| v as u8);
            let color = prior_state.get("color").and_then(Value::as_str).map(str::to_owned);
            let color_temp = prior_state.get("color_temp").and_then(Value::as_u64).map(|v| v as u32);
            ActionKind::LightSet { brightness, color, color_temp }
        }
        Verb::StartTimer { .. } | Verb::CancelTimer => {
            unreachable!("timer verbs dispatch via the timer pool, not entity resolution")
        }
    }
}

/// Dispatch a normalized Action utterance against `registry`/`platform`,
/// recording an undo batch into `undo_slot` before issuing calls. Timer
/// verbs bypass entity resolution and instead acquire/release slots from
/// `timer_pool`.
pub async fn handle(
    normalized_text: &str,
    platform: &Arc<dyn SmartHomePlatform>,
    registry: &[EntityReference],
    undo_slot: &Mutex<UndoSlot>,
    timer_pool: &TimerPool,
) -> HandlerResult {
    let clauses = split_compound(normalized_text);
    if clauses.is_empty() {
        return HandlerResult::graceful_failure(
            "I didn't catch an action to take.",
            "no actionable clause parsed",
        );
    }

    let mut undo_batch = Vec::new();
    let mut successes: Vec<String> = Vec::new();
    let mut failures: Vec<String> = Vec::new();

    let mut call_futures = Vec::new();
    for clause in &clauses {
        match clause.verb {
            Verb::StartTimer { minutes } => {
                handle_start_timer(platform, timer_pool, minutes, &mut undo_batch, &mut successes, &mut failures).await;
                continue;
            }
            Verb::CancelTimer => {
                handle_cancel_timer(&clause.raw_targets, platform, registry, &mut undo_batch, &mut successes, &mut failures).await;
                continue;
            }
            _ => {}
        }

        let targets = resolve_targets(&clause.raw_targets, registry);
        if targets.is_empty() {
            failures.push(clause.raw_targets.clone());
            continue;
        }
        for target in targets {
            let platform = Arc::clone(platform);
            let verb = clause.verb;
            let (domain, service) = domain_service(verb, &target.domain);
            let entity = target.clone();
            call_futures.push(async move {
                let prior_state = platform.get_state(&entity.entity_id).await.unwrap_or(Value::Null);
                let data = service_call_data(verb, &prior_state);
                let result = platform.call_service(domain, service, &entity.entity_id, data).await;
                (entity, verb, prior_state, result)
            });
        }
    }

    let results = join_all(call_futures).await;
    for (entity, verb, prior_state, result) in results {
        match result {
            Ok(_) => {
                undo_batch.push(UndoEntry { entity_id: entity.entity_id.clone(), snapshot: snapshot_for_undo(verb, &prior_state) });
                successes.push(entity.display_name.clone());
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity.entity_id, error = %e, "action service call failed");
                failures.push(entity.display_name.clone());
            }
        }
    }

    if !undo_batch.is_empty() {
        undo_slot.lock().expect("lock").push(undo_batch);
    }

    summarize(&successes, &failures)
}

/// Acquire a slot from `timer_pool`, start it on the platform, and record
/// an undo entry that cancels it (§4.9: "timers are cancelled if the
/// action created one").
async fn handle_start_timer(
    platform: &Arc<dyn SmartHomePlatform>,
    timer_pool: &TimerPool,
    minutes: u64,
    undo_batch: &mut Vec<UndoEntry>,
    successes: &mut Vec<String>,
    failures: &mut Vec<String>,
) {
    let Some(slot) = timer_pool.acquire() else {
        failures.push("timer (no free slots)".to_owned());
        return;
    };
    let remaining_secs = minutes * 60;
    let result = platform.call_service("timer", "start", &slot, serde_json::json!({"duration_secs": remaining_secs})).await;
    match result {
        Ok(_) => {
            undo_batch.push(UndoEntry { entity_id: slot.clone(), snapshot: ActionKind::TimerStart { slot, remaining_secs } });
            successes.push(format!("a {minutes}-minute timer"));
        }
        Err(e) => {
            tracing::warn!(slot = %slot, error = %e, "timer start failed");
            timer_pool.release(slot);
            failures.push("timer".to_owned());
        }
    }
}

/// Resolve the timer entity to cancel (by name, or any `timer.*` entity if
/// the phrase is empty/generic), and record an undo entry that recreates
/// it with the residual duration (§4.9: "... or recreated with residual
/// duration if cancelled").
async fn handle_cancel_timer(
    raw_targets: &str,
    platform: &Arc<dyn SmartHomePlatform>,
    registry: &[EntityReference],
    undo_batch: &mut Vec<UndoEntry>,
    successes: &mut Vec<String>,
    failures: &mut Vec<String>,
) {
    let mut targets = resolve_targets(raw_targets, registry);
    if targets.is_empty() {
        targets = registry.iter().filter(|e| e.domain == "timer").cloned().collect();
    }
    if targets.is_empty() {
        failures.push("timer".to_owned());
        return;
    }
    for target in targets {
        let prior_state = platform.get_state(&target.entity_id).await.unwrap_or(Value::Null);
        let remaining_secs = prior_state.get("remaining_secs").and_then(Value::as_u64).unwrap_or(0);
        match platform.call_service("timer", "cancel", &target.entity_id, serde_json::json!({})).await {
            Ok(_) => {
                undo_batch.push(UndoEntry {
                    entity_id: target.entity_id.clone(),
                    snapshot: ActionKind::TimerCancel { slot: target.entity_id.clone(), remaining_secs },
                });
                successes.push(target.display_name.clone());
            }
            Err(e) => {
                tracing::warn!(entity_id = %target.entity_id, error = %e, "timer cancel failed");
                failures.push(target.display_name.clone());
            }
        }
    }
}

/// "Undo that": pop the most recent undo batch and issue inverse calls.
/// `timer_pool` is released back a slot when undo cancels a timer this
/// same pool started.
pub async fn undo(platform: &Arc<dyn SmartHomePlatform>, undo_slot: &Mutex<UndoSlot>, timer_pool: &TimerPool) -> HandlerResult {
    let batch = { undo_slot.lock().expect("lock").pop_latest() };
    let Some(batch) = batch else {
        return HandlerResult::graceful_failure("There's nothing to undo.", "undo slot empty");
    };

    let mut restored = 0;
    for entry in &batch {
        let (domain, service) = inverse_call_for(&entry.snapshot);
        let data = inverse_call_data(&entry.snapshot);
        if let Err(e) = platform.call_service(domain, service, &entry.entity_id, data).await {
            tracing::warn!(entity_id = %entry.entity_id, error = %e, "undo call failed");
            continue;
        }
        if let ActionKind::TimerStart { slot, .. } = &entry.snapshot {
            timer_pool.release(slot.clone());
        }
        restored += 1;
    }

    if restored == batch.len() {
        HandlerResult::ok(format!("Undone — restored {restored} device(s)."))
    } else {
        HandlerResult::graceful_failure(
            format!("Restored {restored} of {} devices.", batch.len()),
            "partial undo failure",
        )
    }
}

fn inverse_call_for(snapshot: &ActionKind) -> (&'static str, &'static str) {
    match snapshot {
        ActionKind::LightOff => ("light", "turn_off"),
        ActionKind::LightSet { .. } => ("light", "turn_on"),
        ActionKind::ClimateSet { .. } => ("climate", "set_temperature"),
        ActionKind::CoverSet { .. } => ("cover", "set_cover_position"),
        ActionKind::LockSet { locked: true } => ("lock", "lock"),
        ActionKind::LockSet { locked: false } => ("lock", "unlock"),
        ActionKind::TimerStart { .. } => ("timer", "cancel"),
        ActionKind::TimerCancel { .. } => ("timer", "start"),
    }
}

/// Payload carried on the undo call so the restore is faithful, not just
/// the right domain/service (§4.9: restore brightness/color/temp,
/// setpoint/mode/fan, cover position, residual timer duration).
fn inverse_call_data(snapshot: &ActionKind) -> Value {
    match snapshot {
        ActionKind::LightSet { brightness, color, color_temp } => {
            serde_json::json!({"brightness": brightness, "color": color, "color_temp": color_temp})
        }
        ActionKind::ClimateSet { setpoint, mode, fan } => {
            serde_json::json!({"temperature": setpoint, "mode": mode, "fan_mode": fan})
        }
        ActionKind::CoverSet { position } => serde_json::json!({"position": position}),
        ActionKind::TimerCancel { remaining_secs, .. } => serde_json::json!({"duration_secs": remaining_secs}),
        ActionKind::LightOff | ActionKind::LockSet { .. } | ActionKind::TimerStart { .. } => serde_json::json!({}),
    }
}

fn summarize(successes: &[String], failures: &[String]) -> HandlerResult {
    if successes.is_empty() && !failures.is_empty() {
        return HandlerResult::graceful_failure(
            format!("I couldn't find or control: {}.", failures.join(", ")),
            "no targets resolved",
        );
    }
    let mut text = if successes.len() == 1 {
        format!("Done — {}.", successes[0])
    } else {
        format!("Done — {}.", successes.join(", "))
    };
    if !failures.is_empty() {
        text.push_str(&format!(" Couldn't reach: {}.", failures.join(", ")));
    }
    HandlerResult::ok(text)
}

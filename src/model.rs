//! Core data model shared across the pipeline: requests, classifications,
//! entity references, memories, audit entries, undo slots, and conversation
//! context. Grounded on the shape of the teacher's `memory/types.rs` (id
//! generation, serde defaults) generalized to the whole request lifecycle.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a globally-unique id with the given prefix (e.g. `req`, `mem`,
/// `aud`).
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Current wall-clock time in whole seconds since the epoch.
#[must_use]
pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// An inbound utterance to classify, route, and respond to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub utterance: String,
    pub speaker_id: Option<String>,
    pub room_id: Option<String>,
    pub conversation_id: Option<String>,
    pub timestamp: i64,
}

impl Request {
    #[must_use]
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            id: new_id("req"),
            utterance: utterance.into(),
            speaker_id: None,
            room_id: None,
            conversation_id: None,
            timestamp: now_epoch_secs(),
        }
    }

    #[must_use]
    pub fn with_speaker(mut self, speaker_id: impl Into<String>) -> Self {
        self.speaker_id = Some(speaker_id.into());
        self
    }

    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Coarse category assigned to an utterance that selects a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Instant,
    Action,
    Query,
    Conversation,
    Memory,
    Emergency,
    Gesture,
    Unknown,
}

impl Intent {
    /// Intents for which memory retrieval is skipped entirely (§4.6).
    #[must_use]
    pub fn is_retrieval_exempt(self) -> bool {
        matches!(self, Intent::Instant | Intent::Gesture | Intent::Emergency)
    }
}

/// Which stage of the classification cascade produced a [`Classification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Pattern,
    Heuristic,
    Model,
    Fallback,
}

/// The result of running the classifier facade over a normalized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub sub_category: String,
    pub confidence: f32,
    pub source: ClassificationSource,
    pub matched_pattern_id: Option<String>,
}

impl Classification {
    /// The canonical `(Conversation, 0.5, Fallback)` result used whenever
    /// the cascade cannot produce a confident answer within its deadline.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Conversation,
            sub_category: String::new(),
            confidence: 0.5,
            source: ClassificationSource::Fallback,
            matched_pattern_id: None,
        }
    }
}

/// A resolved identifier from the smart-home platform. The core never
/// fabricates these; it only queries and caches what the platform returns.
///
/// `floor` and `groups` mirror `area`: platform-reported tags, never
/// invented by the core, used by the Action handler's floor- and
/// named-group-expansion resolution modes (§4.9 step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity_id: String,
    pub display_name: String,
    pub area: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// The category of a stored memory, each carrying its own retention
/// characteristics via [`MemoryKind::type_weight`] and
/// [`MemoryKind::retention_multiplier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Significant,
    Preference,
    Routine,
    Observation,
    Transient,
}

impl MemoryKind {
    /// Multiplier applied to `base_importance` in the effective-importance
    /// formula (§3). Significant facts about the household outweigh
    /// transient chatter.
    #[must_use]
    pub fn type_weight(self) -> f32 {
        match self {
            MemoryKind::Significant => 1.0,
            MemoryKind::Preference => 0.9,
            MemoryKind::Routine => 0.7,
            MemoryKind::Observation => 0.6,
            MemoryKind::Transient => 0.3,
        }
    }

    /// Multiplier applied to the base half-life in the decay formula.
    /// Significant memories decay more slowly; transient ones faster.
    #[must_use]
    pub fn retention_multiplier(self) -> f32 {
        match self {
            MemoryKind::Significant => 4.0,
            MemoryKind::Preference => 2.0,
            MemoryKind::Routine => 1.5,
            MemoryKind::Observation => 1.0,
            MemoryKind::Transient => 0.25,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Significant => "significant",
            MemoryKind::Preference => "preference",
            MemoryKind::Routine => "routine",
            MemoryKind::Observation => "observation",
            MemoryKind::Transient => "transient",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "significant" => MemoryKind::Significant,
            "preference" => MemoryKind::Preference,
            "routine" => MemoryKind::Routine,
            "observation" => MemoryKind::Observation,
            "transient" => MemoryKind::Transient,
            _ => return None,
        })
    }
}

/// A durable memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub kind: MemoryKind,
    pub base_importance: f32,
    pub emotion: Option<String>,
    pub participants: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u32,
    pub archived: bool,
    /// When this memory was archived, used as the basis for the
    /// `delete_after_days` maintenance cutoff. `None` while active.
    pub archived_at: Option<i64>,
}

impl Memory {
    #[must_use]
    pub fn new(content: impl Into<String>, kind: MemoryKind, base_importance: f32) -> Self {
        let now = now_epoch_secs();
        Self {
            id: new_id("mem"),
            content: content.into(),
            kind,
            base_importance: base_importance.clamp(0.0, 1.0),
            emotion: None,
            participants: Vec::new(),
            tags: Vec::new(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            archived: false,
            archived_at: None,
        }
    }

    #[must_use]
    pub fn has_participant(&self, speaker_id: &str) -> bool {
        self.participants.iter().any(|p| p == speaker_id)
    }

    #[must_use]
    pub fn tag_set(&self) -> HashSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }
}

/// Append-only record of one completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub request_id: String,
    pub conversation_id: Option<String>,
    pub utterance: String,
    pub response: String,
    pub intent: Intent,
    pub handler: String,
    pub alert_flag: bool,
    pub reason: Option<String>,
    pub deleted: bool,
    pub at: i64,
}

impl AuditEntry {
    #[must_use]
    pub fn new(request: &Request, response: &str, intent: Intent, handler: &str) -> Self {
        Self {
            id: new_id("aud"),
            request_id: request.id.clone(),
            conversation_id: request.conversation_id.clone(),
            utterance: request.utterance.clone(),
            response: response.to_owned(),
            intent,
            handler: handler.to_owned(),
            alert_flag: false,
            reason: None,
            deleted: false,
            at: now_epoch_secs(),
        }
    }
}

/// The kind of action an [`UndoSlot`] can invert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionKind {
    LightSet { brightness: Option<u8>, color: Option<String>, color_temp: Option<u32> },
    LightOff,
    ClimateSet { setpoint: Option<f32>, mode: Option<String>, fan: Option<String> },
    CoverSet { position: Option<u8> },
    /// Prior locked/unlocked state of a `lock.*` entity, captured before a
    /// lock or unlock action so undo can restore it against the `lock`
    /// domain rather than `light`.
    LockSet { locked: bool },
    TimerStart { slot: String, remaining_secs: u64 },
    TimerCancel { slot: String, remaining_secs: u64 },
}

/// A captured pre-action snapshot sufficient to invert an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub entity_id: String,
    pub snapshot: ActionKind,
}

/// Per-conversation ring of recent actions, most recent last.
#[derive(Debug, Clone, Default)]
pub struct UndoSlot {
    depth: usize,
    entries: Vec<Vec<UndoEntry>>,
}

impl UndoSlot {
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self { depth: depth.max(1), entries: Vec::new() }
    }

    /// Push a batch of undo entries captured immediately before dispatching
    /// one Action-handler request. Evicts the oldest batch if at capacity.
    pub fn push(&mut self, batch: Vec<UndoEntry>) {
        if self.entries.len() >= self.depth {
            self.entries.remove(0);
        }
        self.entries.push(batch);
    }

    /// Pop (remove and return) the most recent batch, if any.
    pub fn pop_latest(&mut self) -> Option<Vec<UndoEntry>> {
        self.entries.pop()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One turn in a conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
    Summary,
}

/// Bounded ring of recent conversation turns with high-water-mark
/// summarization (§3).
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        // Approximate token count; the exact constant is configuration
        // (see the token-budgeting open question in DESIGN.md).
        self.turns.iter().map(|t| t.text.len()).sum::<usize>() / 4
    }

    pub fn push(&mut self, role: ConversationRole, text: impl Into<String>) {
        self.turns.push(ConversationTurn { role, text: text.into() });
    }

    /// Collapse turns older than `keep_tail` into a single summary turn if
    /// `estimated_tokens()` exceeds `high_water_mark`. `summarize` produces
    /// the replacement text for the collapsed span.
    pub fn maybe_summarize(
        &mut self,
        high_water_mark: usize,
        keep_tail: usize,
        summarize: impl FnOnce(&[ConversationTurn]) -> String,
    ) {
        if self.estimated_tokens() <= high_water_mark || self.turns.len() <= keep_tail {
            return;
        }
        let split_at = self.turns.len() - keep_tail;
        let (head, tail) = self.turns.split_at(split_at);
        let summary_text = summarize(head);
        let mut rebuilt = Vec::with_capacity(tail.len() + 1);
        rebuilt.push(ConversationTurn { role: ConversationRole::Summary, text: summary_text });
        rebuilt.extend_from_slice(tail);
        self.turns = rebuilt;
    }
}

/// Status of a handler's attempt to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Ok,
    PartialFailure,
    GracefulFailure,
    Timeout,
}

/// Structured result every handler returns; the orchestrator never sees a
/// raw error from a handler, only this (§7 propagation policy).
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub text: String,
    pub status: HandlerStatus,
    pub diagnostics: Vec<String>,
}

impl HandlerResult {
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), status: HandlerStatus::Ok, diagnostics: Vec::new() }
    }

    #[must_use]
    pub fn graceful_failure(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: HandlerStatus::GracefulFailure,
            diagnostics: vec![reason.into()],
        }
    }

    #[must_use]
    pub fn timeout(text: impl Into<String>) -> Self {
        Self { text: text.into(), status: HandlerStatus::Timeout, diagnostics: Vec::new() }
    }
}

/// The final response returned from `process(Request)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub intent: Intent,
    pub handler: String,
    pub latency_ms: u64,
    pub trace_id: String,
}

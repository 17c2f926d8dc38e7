//! C13 Orchestrator (§4.13): sequences C1 → C5 → (C6) → C12 (parallel) →
//! {C8|C9|C10|C11} → C7 (async fire-and-forget) → Response under per-stage
//! and total deadlines, with bounded backpressure and a fixed failure
//! policy per stage.
//!
//! The semaphore-bounded admission gate and the "only a hard capacity
//! rejection ever reaches the caller as an error" propagation shape are
//! grounded on the teacher's `PipelineCoordinator` admission/backpressure
//! posture, generalized from audio frame backpressure to request
//! backpressure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant as StdInstant};

use chrono::{Local, Timelike};
use tokio::sync::Semaphore;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::handlers::{self, action, conversation, instant, memory_op, HandlerKind};
use crate::interfaces::{AuditSink, LanguageModel, NotificationSink, SmartHomePlatform};
use crate::memory::{MemoryFilters, MemoryRetriever, MemoryStore};
use crate::model::{
    AuditEntry, Classification, ConversationContext, ConversationRole, HandlerResult, Intent, Request, Response,
    UndoSlot,
};
use crate::overrides::{MatchContext, OverrideStore};
use crate::pattern::PatternStore;
use crate::preprocess::normalize;
use crate::safety::SafetyMonitor;

const CLARIFICATION_MESSAGE: &str = "I didn't catch anything to respond to. Could you say that again?";
const TOTAL_TIMEOUT_MESSAGE: &str = "Sorry, that took too long. Please try again.";
const HANDLER_TIMEOUT_MESSAGE: &str = "Sorry, that's taking too long. Please try again.";

/// Deadline-bounded sequencing of the whole pipeline for one request.
pub struct Orchestrator {
    config: CoreConfig,
    patterns: Arc<PatternStore>,
    overrides: Arc<OverrideStore>,
    model: Option<Arc<dyn LanguageModel>>,
    platform: Arc<dyn SmartHomePlatform>,
    memory_store: Arc<MemoryStore>,
    retriever: Arc<MemoryRetriever>,
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationSink>,
    safety: SafetyMonitor,
    semaphore: Arc<Semaphore>,
    conversations: Mutex<HashMap<String, ConversationContext>>,
    undo_slots: Mutex<HashMap<String, UndoSlot>>,
    timer_pool: Arc<action::TimerPool>,
}

impl Orchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoreConfig,
        patterns: Arc<PatternStore>,
        overrides: Arc<OverrideStore>,
        model: Option<Arc<dyn LanguageModel>>,
        platform: Arc<dyn SmartHomePlatform>,
        memory_store: Arc<MemoryStore>,
        audit: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let retriever = Arc::new(MemoryRetriever::new(
            Arc::clone(&memory_store),
            model.clone().unwrap_or_else(|| Arc::new(NoopModel) as Arc<dyn LanguageModel>),
            config.memory.clone(),
        ));
        let safety = SafetyMonitor::new(&config.safety);
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max_in_flight_requests));
        let timer_pool = Arc::new(action::TimerPool::new(config.concurrency.timer_slot_ids.clone()));
        Self {
            config,
            patterns,
            overrides,
            model,
            platform,
            memory_store,
            retriever,
            audit,
            notifications,
            safety,
            semaphore,
            conversations: Mutex::new(HashMap::new()),
            undo_slots: Mutex::new(HashMap::new()),
            timer_pool,
        }
    }

    /// Run the full pipeline for `request`. The only `Err` this returns is
    /// [`CoreError::Busy`] (§7 propagation policy: "errors are never
    /// propagated to the caller of `process` except for hard capacity
    /// rejections"). Every other failure mode is folded into a textual
    /// `Response`.
    pub async fn process(&self, request: Request) -> Result<Response> {
        let started = StdInstant::now();
        let Ok(_permit) = self.semaphore.clone().try_acquire_owned() else {
            return Err(CoreError::Busy);
        };

        let total_budget = Duration::from_millis(self.config.deadlines.total_ms);
        match tokio::time::timeout(total_budget, self.process_inner(&request, started)).await {
            Ok(response) => Ok(response),
            Err(_) => {
                tracing::warn!(request_id = %request.id, "orchestrator exceeded total deadline");
                Ok(Response {
                    text: TOTAL_TIMEOUT_MESSAGE.to_owned(),
                    intent: Intent::Unknown,
                    handler: "timeout".to_owned(),
                    latency_ms: started.elapsed().as_millis() as u64,
                    trace_id: request.id.clone(),
                })
            }
        }
    }

    async fn process_inner(&self, request: &Request, started: StdInstant) -> Response {
        if request.utterance.trim().is_empty() {
            return Response {
                text: CLARIFICATION_MESSAGE.to_owned(),
                intent: Intent::Unknown,
                handler: "none".to_owned(),
                latency_ms: started.elapsed().as_millis() as u64,
                trace_id: request.id.clone(),
            };
        }

        let normalized = normalize(&request.utterance);
        if normalized.text.is_empty() {
            return Response {
                text: CLARIFICATION_MESSAGE.to_owned(),
                intent: Intent::Unknown,
                handler: "none".to_owned(),
                latency_ms: started.elapsed().as_millis() as u64,
                trace_id: request.id.clone(),
            };
        }

        let classification = {
            let patterns_facade = crate::classifier::ClassifierFacade::new(
                Arc::clone(&self.patterns),
                self.model.clone(),
                self.config.classification.clone(),
            );
            patterns_facade.classify(&normalized.text, &self.config.deadlines).await
        };

        let memories = self.maybe_retrieve(&normalized.text, request, &classification).await;

        let conversation_key = request.conversation_id.clone().unwrap_or_else(|| request.id.clone());
        let mut context = self.take_conversation(&conversation_key);

        let handler_kind = handlers::resolve_handler(classification.intent, &self.config.routing);

        let (safety_flagged, handler_result) = tokio::join!(
            self.safety.scan(request, &self.notifications),
            self.dispatch(handler_kind, &classification, &normalized, request, &memories, &mut context, &conversation_key),
        );

        self.put_conversation(conversation_key, context);

        self.spawn_memory_writeback(handler_kind, &classification, request, &normalized.raw, &handler_result);

        self.record_audit(request, &handler_result.text, classification.intent, handler_kind.as_str(), safety_flagged)
            .await;

        Response {
            text: handler_result.text,
            intent: classification.intent,
            handler: handler_kind.as_str().to_owned(),
            latency_ms: started.elapsed().as_millis() as u64,
            trace_id: request.id.clone(),
        }
    }

    async fn maybe_retrieve(
        &self,
        query: &str,
        request: &Request,
        classification: &Classification,
    ) -> Vec<crate::memory::Scored> {
        if classification.intent.is_retrieval_exempt() {
            return Vec::new();
        }
        let budget = Duration::from_millis(self.config.deadlines.retrieval_ms);
        let filters = MemoryFilters { speaker_id: request.speaker_id.clone(), ..Default::default() };
        match tokio::time::timeout(budget, self.retriever.retrieve(query, 5, &filters)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "memory retrieval failed, continuing with empty context");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("memory retrieval exceeded its deadline, continuing with empty context");
                Vec::new()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        handler_kind: HandlerKind,
        classification: &Classification,
        normalized: &crate::preprocess::Normalized,
        request: &Request,
        memories: &[crate::memory::Scored],
        context: &mut ConversationContext,
        conversation_key: &str,
    ) -> HandlerResult {
        match handler_kind {
            HandlerKind::Instant => {
                let repeat_slot = context
                    .turns
                    .iter()
                    .rev()
                    .find(|t| t.role == ConversationRole::Assistant)
                    .map(|t| t.text.clone());
                let budget = Duration::from_millis(self.config.deadlines.handler_instant_ms);
                let result = tokio::time::timeout(budget, async {
                    instant::handle(&classification.sub_category, &normalized.raw, &request.id, repeat_slot.as_deref())
                })
                .await
                .unwrap_or_else(|_| HandlerResult::timeout(HANDLER_TIMEOUT_MESSAGE));
                self.append_turn(context, &normalized.raw, &result.text);
                result
            }
            HandlerKind::Action => {
                let override_ctx = MatchContext {
                    speaker_id: request.speaker_id.as_deref(),
                    room_id: request.room_id.as_deref(),
                    hour: Local::now().hour(),
                };
                if self.overrides.snapshot().is_domain_blocked(&override_ctx, "action") {
                    let result = HandlerResult::graceful_failure(
                        "That's not allowed right now.",
                        "action blocked by override rule",
                    );
                    self.append_turn(context, &normalized.raw, &result.text);
                    return result;
                }

                let registry = self.platform.list_entities().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to list entities for action dispatch");
                    Vec::new()
                });
                let undo_slot = Mutex::new(self.take_undo_slot(conversation_key));
                let budget = Duration::from_millis(self.config.deadlines.handler_action_ms);
                let result = tokio::time::timeout(budget, async {
                    if classification.sub_category == "undo" {
                        action::undo(&self.platform, &undo_slot, &self.timer_pool).await
                    } else {
                        action::handle(&normalized.text, &self.platform, &registry, &undo_slot, &self.timer_pool).await
                    }
                })
                .await
                .unwrap_or_else(|_| HandlerResult::timeout(HANDLER_TIMEOUT_MESSAGE));
                self.put_undo_slot(conversation_key.to_owned(), undo_slot.into_inner().expect("lock"));
                self.append_turn(context, &normalized.raw, &result.text);
                result
            }
            HandlerKind::Conversation => {
                let Some(model) = &self.model else {
                    return HandlerResult::graceful_failure(
                        "I can't have a conversation right now.",
                        "no language model configured",
                    );
                };
                conversation::handle(
                    &normalized.raw,
                    model.as_ref(),
                    &self.config.persona,
                    &self.config.conversation,
                    memories,
                    context,
                    &self.config.deadlines,
                )
                .await
            }
            HandlerKind::MemoryOp => {
                let speaker = request.speaker_id.as_deref().unwrap_or("unknown");
                let budget = Duration::from_millis(self.config.deadlines.handler_memory_op_ms);
                let result = tokio::time::timeout(
                    budget,
                    memory_op::handle(&classification.sub_category, &normalized.text, speaker, &self.memory_store, &self.retriever),
                )
                .await
                .unwrap_or_else(|_| HandlerResult::timeout(HANDLER_TIMEOUT_MESSAGE));
                self.append_turn(context, &normalized.raw, &result.text);
                result
            }
        }
    }

    fn append_turn(&self, context: &mut ConversationContext, utterance: &str, reply: &str) {
        context.push(ConversationRole::User, utterance.to_owned());
        context.push(ConversationRole::Assistant, reply.to_owned());
        let cfg = &self.config.conversation;
        context.maybe_summarize(cfg.high_water_mark_tokens, cfg.keep_tail_turns, |head| {
            format!("{} earlier turn(s) omitted.", head.len())
        });
    }

    fn take_conversation(&self, key: &str) -> ConversationContext {
        self.conversations.lock().expect("lock").get(key).cloned().unwrap_or_default()
    }

    fn put_conversation(&self, key: String, context: ConversationContext) {
        self.conversations.lock().expect("lock").insert(key, context);
    }

    fn take_undo_slot(&self, key: &str) -> UndoSlot {
        self.undo_slots
            .lock()
            .expect("lock")
            .get(key)
            .cloned()
            .unwrap_or_else(|| UndoSlot::new(self.config.concurrency.undo_slot_depth))
    }

    fn put_undo_slot(&self, key: String, slot: UndoSlot) {
        self.undo_slots.lock().expect("lock").insert(key, slot);
    }

    /// C7's "async fire-and-forget" leg of the dataflow (§2): after a
    /// successful Conversation turn, remember the exchange as a
    /// low-importance Observation so future retrieval has something to
    /// find (§8 scenario 5: "memory write fired asynchronously"). Spawned
    /// rather than awaited so it never delays the response; failures are
    /// logged only, per §7's downstream-write-failure policy.
    fn spawn_memory_writeback(
        &self,
        handler_kind: HandlerKind,
        classification: &Classification,
        request: &Request,
        raw_utterance: &str,
        handler_result: &HandlerResult,
    ) {
        if handler_kind != HandlerKind::Conversation
            || classification.intent.is_retrieval_exempt()
            || handler_result.status != crate::model::HandlerStatus::Ok
            || self.model.is_none()
        {
            return;
        }
        let retriever = Arc::clone(&self.retriever);
        let mut memory = crate::model::Memory::new(
            format!("{raw_utterance} — {}", handler_result.text),
            crate::model::MemoryKind::Observation,
            0.3,
        );
        if let Some(speaker) = &request.speaker_id {
            memory.participants.push(speaker.clone());
        }
        tokio::spawn(async move {
            if let Err(e) = retriever.create_with_embedding(&memory).await {
                tracing::warn!(memory_id = %memory.id, error = %e, "conversation memory write-back failed");
            }
        });
    }

    async fn record_audit(&self, request: &Request, response_text: &str, intent: Intent, handler: &str, alert_flag: bool) {
        let mut entry = AuditEntry::new(request, response_text, intent, handler);
        entry.alert_flag = alert_flag;
        if let Err(e) = self.audit.append(entry).await {
            tracing::warn!(error = %e, "audit append failed");
        }
    }
}

/// Used only when no language model collaborator is configured, so the
/// retriever still has something to call `embed` on (it will simply
/// never be exercised by a retrieval-exempt or model-less deployment).
struct NoopModel;

#[async_trait::async_trait]
impl LanguageModel for NoopModel {
    async fn complete(&self, _messages: &[crate::interfaces::ChatMessage], _params: &crate::interfaces::CompletionParams) -> Result<String> {
        Err(CoreError::PermanentExternal("no language model configured".into()))
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(CoreError::PermanentExternal("no language model configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternSetConfig;
    use crate::interfaces::mocks::{MockPlatform, NullNotificationSink};
    use crate::interfaces::{ChatMessage, CompletionParams};
    use crate::model::EntityReference;
    use crate::pattern::{PatternGroup, PatternSet, PatternSpec};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, messages: &[ChatMessage], _params: &CompletionParams) -> Result<String> {
            Ok(format!("You said: {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1; crate::memory::EMBEDDING_DIM])
        }
    }

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

    fn harness(tmp: &TempDir) -> Orchestrator {
        let config = CoreConfig { patterns: PatternSetConfig::default(), ..CoreConfig::default() };
        let patterns = Arc::new(PatternStore::new(seed_patterns()));
        let overrides = Arc::new(OverrideStore::new(crate::overrides::OverrideSet::default()));
        let model: Arc<dyn LanguageModel> = Arc::new(EchoModel);
        let platform: Arc<dyn SmartHomePlatform> = Arc::new(MockPlatform::new(vec![EntityReference {
            entity_id: "light.kitchen_main".into(),
            display_name: "Kitchen Light".into(),
            area: Some("kitchen".into()),
            domain: "light".into(),
            floor: None,
            groups: Vec::new(),
        }]));
        let memory_store = Arc::new(MemoryStore::new(tmp.path()).expect("store"));
        let audit: Arc<dyn AuditSink> = Arc::new(Mutex::new(Vec::<AuditEntry>::new()));
        let notifications: Arc<dyn NotificationSink> = Arc::new(NullNotificationSink);
        Orchestrator::new(config, patterns, overrides, Some(model), platform, memory_store, audit, notifications)
    }

    fn harness_with_store(tmp: &TempDir) -> (Orchestrator, Arc<MemoryStore>) {
        let config = CoreConfig { patterns: PatternSetConfig::default(), ..CoreConfig::default() };
        let patterns = Arc::new(PatternStore::new(seed_patterns()));
        let overrides = Arc::new(OverrideStore::new(crate::overrides::OverrideSet::default()));
        let model: Arc<dyn LanguageModel> = Arc::new(EchoModel);
        let platform: Arc<dyn SmartHomePlatform> = Arc::new(MockPlatform::new(vec![]));
        let memory_store = Arc::new(MemoryStore::new(tmp.path()).expect("store"));
        let audit: Arc<dyn AuditSink> = Arc::new(Mutex::new(Vec::<AuditEntry>::new()));
        let notifications: Arc<dyn NotificationSink> = Arc::new(NullNotificationSink);
        let orch = Orchestrator::new(
            config,
            patterns,
            overrides,
            Some(model),
            platform,
            Arc::clone(&memory_store),
            audit,
            notifications,
        );
        (orch, memory_store)
    }

    #[tokio::test]
    async fn instant_request_round_trips() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = harness(&tmp);
        let response = orch.process(Request::new("what time is it")).await.expect("process");
        assert_eq!(response.intent, Intent::Instant);
        assert_eq!(response.handler, "instant");
        assert!(response.text.contains(':'));
    }

    #[tokio::test]
    async fn action_request_then_undo_restores_state() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = harness(&tmp);
        let conv = Request::new("turn on the kitchen light").with_conversation("conv-1");
        let response = orch.process(conv).await.expect("process");
        assert_eq!(response.handler, "action");
        assert!(response.text.to_lowercase().contains("done"));

        let undo_request = Request::new("undo that").with_conversation("conv-1");
        let undo_response = orch.process(undo_request).await.expect("process");
        assert!(undo_response.text.to_lowercase().contains("undone") || undo_response.text.to_lowercase().contains("restored"));
    }

    #[tokio::test]
    async fn memory_store_then_recall_round_trips() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = harness(&tmp);
        let store_req = Request::new("remember that the wifi password is sunflower").with_speaker("alice");
        let response = orch.process(store_req).await.expect("process");
        assert_eq!(response.handler, "memory_op");
        assert!(response.text.to_lowercase().contains("remember"));
    }

    #[tokio::test]
    async fn conversation_fallback_when_no_pattern_or_heuristic_match() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = harness(&tmp);
        let response = orch.process(Request::new("tell me something interesting")).await.expect("process");
        assert_eq!(response.handler, "conversation");
        assert!(response.text.contains("You said"));
    }

    #[tokio::test]
    async fn conversation_turn_writes_back_memory_asynchronously() {
        let tmp = TempDir::new().expect("tempdir");
        let (orch, memory_store) = harness_with_store(&tmp);
        let response = orch
            .process(Request::new("tell me about the kids' school day").with_speaker("alice"))
            .await
            .expect("process");
        assert_eq!(response.handler, "conversation");

        // The write-back is fire-and-forget; give the spawned task a turn.
        for _ in 0..50 {
            if !memory_store.list_active(&MemoryFilters::default()).expect("list").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stored = memory_store.list_active(&MemoryFilters::default()).expect("list");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.contains("kids"));
        assert!(stored[0].has_participant("alice"));
    }

    #[tokio::test]
    async fn empty_utterance_yields_clarification_without_dispatch() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = harness(&tmp);
        let response = orch.process(Request::new("   ")).await.expect("process");
        assert_eq!(response.handler, "none");
        assert_eq!(response.text, CLARIFICATION_MESSAGE);
    }

    #[tokio::test]
    async fn backpressure_rejects_beyond_bound() {
        let tmp = TempDir::new().expect("tempdir");
        let config = CoreConfig {
            concurrency: crate::config::ConcurrencyConfig { max_in_flight_requests: 1, undo_slot_depth: 5, ..crate::config::ConcurrencyConfig::default() },
            ..CoreConfig::default()
        };
        let patterns = Arc::new(PatternStore::new(seed_patterns()));
        let overrides = Arc::new(OverrideStore::new(crate::overrides::OverrideSet::default()));
        let model: Arc<dyn LanguageModel> = Arc::new(EchoModel);
        let platform: Arc<dyn SmartHomePlatform> = Arc::new(MockPlatform::new(vec![]));
        let memory_store = Arc::new(MemoryStore::new(tmp.path()).expect("store"));
        let audit: Arc<dyn AuditSink> = Arc::new(Mutex::new(Vec::<AuditEntry>::new()));
        let notifications: Arc<dyn NotificationSink> = Arc::new(NullNotificationSink);
        let orch = Arc::new(Orchestrator::new(config, patterns, overrides, Some(model), platform, memory_store, audit, notifications));

        let permit = orch.semaphore.clone().try_acquire_owned().expect("acquire");
        let result = orch.process(Request::new("what time is it")).await;
        assert!(matches!(result, Err(CoreError::Busy)));
        drop(permit);
    }
}

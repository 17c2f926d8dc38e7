//! C10 Handler: Conversation (§4.10). Assembles a prompt from the persona
//! block, the conversation window, retrieved memories, and a time-of-day
//! token; calls the language model under its own deadline; post-processes
//! the reply; appends the turn to the conversation context.
//!
//! Prompt assembly follows the teacher's `llm/api.rs` message-building
//! shape (system + rolling turns as alternating user/assistant messages);
//! the graceful canned fallback on model failure mirrors
//! `llm/fallback.rs`'s "never let the user hear an error" posture.

use std::time::Duration;

use chrono::{Local, Timelike};

use crate::config::{ConversationConfig, DeadlineConfig, PersonaConfig};
use crate::interfaces::{ChatMessage, CompletionParams, LanguageModel};
use crate::memory::Scored;
use crate::model::{ConversationContext, ConversationRole, HandlerResult};

const CANNED_FALLBACK: &str = "I'm having trouble thinking of a reply right now. Could you try again?";

fn time_of_day_token() -> &'static str {
    match Local::now().hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    }
}

fn build_messages(
    persona: &PersonaConfig,
    memories: &[Scored],
    context: &ConversationContext,
    utterance: &str,
) -> Vec<ChatMessage> {
    let mut system = persona.persona_block.clone();
    system.push_str(&format!("\nIt is currently the {}.", time_of_day_token()));
    if !memories.is_empty() {
        system.push_str("\nRelevant things you remember about this household:\n");
        for m in memories {
            system.push_str(&format!("- {}\n", m.memory.content));
        }
    }

    let mut messages = vec![ChatMessage { role: crate::interfaces::MessageRole::System, content: system }];
    for turn in &context.turns {
        let role = match turn.role {
            ConversationRole::User => crate::interfaces::MessageRole::User,
            ConversationRole::Assistant => crate::interfaces::MessageRole::Assistant,
            ConversationRole::Summary => crate::interfaces::MessageRole::System,
        };
        messages.push(ChatMessage { role, content: turn.text.clone() });
    }
    messages.push(ChatMessage { role: crate::interfaces::MessageRole::User, content: utterance.to_owned() });
    messages
}

/// Strip simple markup the model might emit (markdown emphasis/fences)
/// and cap the response length (§4.10 post-processing step).
fn postprocess(raw: &str, char_cap: usize) -> String {
    let stripped = raw
        .replace("**", "")
        .replace('*', "")
        .replace("```", "")
        .trim()
        .to_owned();
    if stripped.chars().count() > char_cap {
        let truncated: String = stripped.chars().take(char_cap.saturating_sub(1)).collect();
        format!("{truncated}…")
    } else {
        stripped
    }
}

/// Run one Conversation-handler turn. `memories` is the pre-retrieved set
/// from the C6 Memory Retriever (empty if retrieval was skipped or timed
/// out); `context` is appended to in place on success.
pub async fn handle(
    utterance: &str,
    model: &dyn LanguageModel,
    persona: &PersonaConfig,
    conversation_cfg: &ConversationConfig,
    memories: &[Scored],
    context: &mut ConversationContext,
    deadlines: &DeadlineConfig,
) -> HandlerResult {
    let messages = build_messages(persona, memories, context, utterance);
    let params = CompletionParams { model: "conversation".to_owned(), max_tokens: 256, temperature: 0.7 };
    let budget = Duration::from_millis(deadlines.handler_conversation_ms);

    let reply = match tokio::time::timeout(budget, model.complete(&messages, &params)).await {
        Ok(Ok(text)) => postprocess(&text, conversation_cfg.response_char_cap),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "conversation handler model call failed");
            return HandlerResult::graceful_failure(CANNED_FALLBACK, format!("model error: {e}"));
        }
        Err(_) => {
            tracing::warn!("conversation handler exceeded its deadline");
            return HandlerResult::timeout(CANNED_FALLBACK);
        }
    };

    context.push(ConversationRole::User, utterance.to_owned());
    context.push(ConversationRole::Assistant, reply.clone());
    let summarize_source = persona.name.clone();
    context.maybe_summarize(
        conversation_cfg.high_water_mark_tokens,
        conversation_cfg.keep_tail_turns,
        |head| format!("{summarize_source} recalls {} earlier turn(s) of small talk.", head.len()),
    );

    HandlerResult::ok(reply)
}

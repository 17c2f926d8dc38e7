//! C11 Handler: Memory-op (§4.11). Dispatches on `sub_category` to
//! store/recall/forget a durable memory on behalf of the requesting
//! speaker. Thin orchestration over the C6/C7 memory subsystem; the
//! clause-extraction here follows the teacher's `voice_command.rs`
//! prefix-stripping idiom rather than regex.

use std::sync::Arc;

use crate::error::Result;
use crate::memory::{MemoryFilters, MemoryRetriever, MemoryStore};
use crate::model::{HandlerResult, Memory, MemoryKind};

const STORE_PREFIXES: &[&str] = &["remember that ", "remember ", "don't forget that ", "note that "];
const RECALL_PREFIXES: &[&str] = &["what do you remember about ", "do you remember ", "recall "];
const FORGET_PREFIXES: &[&str] = &["forget that ", "forget about ", "forget "];

fn strip_any<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| text.strip_prefix(p))
}

/// Dispatch a Memory-op request. `speaker_id` tags the created/queried
/// memory's participant list; `normalized_text` is the lower-cased,
/// trimmed utterance.
pub async fn handle(
    sub_category: &str,
    normalized_text: &str,
    speaker_id: &str,
    store: &Arc<MemoryStore>,
    retriever: &MemoryRetriever,
) -> HandlerResult {
    match sub_category {
        "store" => handle_store(normalized_text, speaker_id, retriever).await,
        "recall" => handle_recall(normalized_text, speaker_id, retriever).await,
        "forget" => handle_forget(normalized_text, speaker_id, store),
        other => HandlerResult::graceful_failure(
            "I'm not sure what to do with that memory request.",
            format!("unknown memory_op sub_category: {other}"),
        ),
    }
}

async fn handle_store(normalized_text: &str, speaker_id: &str, retriever: &MemoryRetriever) -> HandlerResult {
    let Some(value_clause) = strip_any(normalized_text, STORE_PREFIXES) else {
        return HandlerResult::graceful_failure(
            "I didn't catch what you want me to remember.",
            "no store clause extracted",
        );
    };
    let value_clause = value_clause.trim();
    if value_clause.is_empty() {
        return HandlerResult::graceful_failure(
            "I didn't catch what you want me to remember.",
            "empty store clause",
        );
    }

    let mut memory = Memory::new(value_clause.to_owned(), MemoryKind::Preference, 0.6);
    memory.participants.push(speaker_id.to_owned());

    match retriever.create_with_embedding(&memory).await {
        Ok(()) => HandlerResult::ok(format!("Got it — I'll remember that {value_clause}.")),
        Err(e) => {
            tracing::warn!(error = %e, "memory_op store failed");
            HandlerResult::graceful_failure("I couldn't save that just now.", format!("store error: {e}"))
        }
    }
}

async fn handle_recall(normalized_text: &str, speaker_id: &str, retriever: &MemoryRetriever) -> HandlerResult {
    let query = strip_any(normalized_text, RECALL_PREFIXES).unwrap_or(normalized_text).trim();
    if query.is_empty() {
        return HandlerResult::graceful_failure(
            "What would you like me to recall?",
            "empty recall query",
        );
    }

    let filters = MemoryFilters { speaker_id: Some(speaker_id.to_owned()), ..Default::default() };
    match retriever.retrieve(query, 1, &filters).await {
        Ok(hits) if !hits.is_empty() => HandlerResult::ok(hits[0].memory.content.clone()),
        Ok(_) => HandlerResult::ok("I don't have anything stored about that."),
        Err(e) => {
            tracing::warn!(error = %e, "memory_op recall failed");
            HandlerResult::graceful_failure("I couldn't look that up just now.", format!("recall error: {e}"))
        }
    }
}

fn handle_forget(normalized_text: &str, speaker_id: &str, store: &Arc<MemoryStore>) -> HandlerResult {
    let topic = strip_any(normalized_text, FORGET_PREFIXES).unwrap_or(normalized_text).trim();
    let filters = if topic.is_empty() || topic == "everything" {
        MemoryFilters { speaker_id: Some(speaker_id.to_owned()), ..Default::default() }
    } else {
        MemoryFilters { speaker_id: Some(speaker_id.to_owned()), tag: Some(topic.to_owned()), ..Default::default() }
    };

    match store.soft_delete_matching(&filters, "user requested forget") {
        Ok(0) => HandlerResult::ok("I didn't find anything matching that to forget."),
        Ok(n) => HandlerResult::ok(format!("Done — forgot {n} thing(s).")),
        Err(e) => {
            tracing::warn!(error = %e, "memory_op forget failed");
            HandlerResult::graceful_failure("I couldn't forget that just now.", format!("forget error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryScoringConfig;
    use crate::interfaces::{ChatMessage, CompletionParams, LanguageModel};
    use crate::model::HandlerStatus;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ConstantEmbedder;

    #[async_trait]
    impl LanguageModel for ConstantEmbedder {
        async fn complete(&self, _messages: &[ChatMessage], _params: &CompletionParams) -> Result<String> {
            Ok(String::new())
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; crate::memory::EMBEDDING_DIM])
        }
    }

    fn harness() -> (Arc<MemoryStore>, MemoryRetriever, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let store = Arc::new(MemoryStore::new(tmp.path()).expect("store"));
        let model: Arc<dyn LanguageModel> = Arc::new(ConstantEmbedder);
        let retriever = MemoryRetriever::new(Arc::clone(&store), model, MemoryScoringConfig::default());
        (store, retriever, tmp)
    }

    #[tokio::test]
    async fn store_then_recall_round_trips() {
        let (_store, retriever, _tmp) = harness();
        let stored = handle_store("remember that the wifi password is sunflower", "alice", &retriever).await;
        assert_eq!(stored.status, HandlerStatus::Ok);

        let recalled = handle_recall("what do you remember about the wifi password", "alice", &retriever).await;
        assert_eq!(recalled.status, HandlerStatus::Ok);
        assert!(recalled.text.contains("sunflower"));
    }

    #[tokio::test]
    async fn store_without_clause_is_graceful_failure() {
        let (_store, retriever, _tmp) = harness();
        let r = handle_store("remember", "alice", &retriever).await;
        assert_eq!(r.status, HandlerStatus::GracefulFailure);
    }

    #[tokio::test]
    async fn recall_with_nothing_stored_says_so() {
        let (_store, retriever, _tmp) = harness();
        let r = handle_recall("do you remember my favorite color", "alice", &retriever).await;
        assert_eq!(r.status, HandlerStatus::Ok);
        assert!(r.text.contains("nothing") || r.text.contains("don't have"));
    }

    #[tokio::test]
    async fn forget_removes_matching_memory() {
        let (store, retriever, _tmp) = harness();
        handle_store("remember that I like tea", "alice", &retriever).await;
        let r = handle_forget("forget everything", "alice", &store);
        assert_eq!(r.status, HandlerStatus::Ok);
        assert!(r.text.contains('1'));
        assert!(store.list_active(&MemoryFilters::default()).expect("list").is_empty());
    }

    #[tokio::test]
    async fn forget_with_no_match_says_so() {
        let (store, _retriever, _tmp) = harness();
        let r = handle_forget("forget about dinosaurs", "alice", &store);
        assert_eq!(r.status, HandlerStatus::Ok);
        assert!(r.text.contains("didn't find"));
    }

    #[tokio::test]
    async fn unknown_sub_category_is_graceful_failure() {
        let (store, retriever, _tmp) = harness();
        let r = handle("nonsense", "blah", "alice", &store, &retriever).await;
        assert_eq!(r.status, HandlerStatus::GracefulFailure);
    }
}

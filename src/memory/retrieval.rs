//! C6 Memory Retriever (§4.6): embed the query, fetch an oversampled
//! nearest-neighbor candidate set, rerank by the weighted retrieval score,
//! filter, and stamp access on the returned set.

use std::sync::Arc;

use crate::config::MemoryScoringConfig;
use crate::error::Result;
use crate::interfaces::LanguageModel;
use crate::model::{now_epoch_secs, Memory};

use super::scoring::{cosine_similarity, retrieval_score};
use super::store::{MemoryFilters, MemoryStore};

/// One scored retrieval hit.
#[derive(Debug, Clone)]
pub struct Scored {
    pub memory: Memory,
    pub score: f32,
}

/// Retrieves memories relevant to `query`, applying §4.6's algorithm:
/// embed, oversample by vector distance, rerank by the weighted score,
/// apply filters, then return the top `k`.
pub struct MemoryRetriever {
    store: Arc<MemoryStore>,
    model: Arc<dyn LanguageModel>,
    cfg: MemoryScoringConfig,
}

impl MemoryRetriever {
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, model: Arc<dyn LanguageModel>, cfg: MemoryScoringConfig) -> Self {
        Self { store, model, cfg }
    }

    /// Create `memory` and embed its content so it is immediately
    /// semantically retrievable (§4.7 `create(memory)` combined with the
    /// §4.6 embedding step — a memory with no embedding can never be a
    /// nearest-neighbor candidate). The memory row and its embedding are
    /// written even if one half fails; callers see the first error.
    pub async fn create_with_embedding(&self, memory: &Memory) -> Result<()> {
        self.store.create(memory)?;
        let vector = self.model.embed(&memory.content).await?;
        self.store.store_embedding(&memory.id, &vector)
    }

    /// Run the full retrieval algorithm. Returns up to `k` memories,
    /// highest score first; ties broken by recency then id (§4.6).
    pub async fn retrieve(&self, query: &str, k: usize, filters: &MemoryFilters) -> Result<Vec<Scored>> {
        let query_vec = self.model.embed(query).await?;
        let oversample = (4 * k).max(20);

        let neighbor_ids = self.store.search_by_vector(&query_vec, oversample)?;
        let now = now_epoch_secs();

        let mut scored = Vec::new();
        for (id, _distance) in neighbor_ids {
            let Some(memory) = self.store.get(&id)? else { continue };
            if memory.archived {
                continue;
            }
            if !matches_filters(&memory, filters) {
                continue;
            }
            let Some(embedding) = self.store.get_embedding(&memory.id)? else { continue };
            let similarity = cosine_similarity(&query_vec, &embedding);
            let score = retrieval_score(&memory, similarity, &self.cfg, now);
            scored.push(Scored { memory, score });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(k);

        for hit in &scored {
            // Best-effort: a failed access stamp never fails the retrieval.
            if let Err(e) = self.store.touch_access(&hit.memory.id) {
                tracing::warn!(memory_id = %hit.memory.id, error = %e, "failed to stamp memory access");
            }
        }

        Ok(scored)
    }
}

fn matches_filters(memory: &Memory, filters: &MemoryFilters) -> bool {
    if let Some(speaker) = &filters.speaker_id {
        if !memory.has_participant(speaker) {
            return false;
        }
    }
    if let Some(tag) = &filters.tag {
        if !memory.tag_set().contains(tag.as_str()) {
            return false;
        }
    }
    if let Some(kind) = filters.kind {
        if memory.kind != kind {
            return false;
        }
    }
    true
}

//! External-collaborator interfaces (§6). Everything explicitly out of
//! scope per §1 — STT/TTS, the platform's own state store, the dashboard,
//! the secrets store, process supervision — is consumed only through these
//! narrow traits. Grounded on the teacher's `ChannelAdapter` trait shape
//! (async_trait, small surface, no leaking of transport details).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{AuditEntry, EntityReference};

/// One inbound state-change event from the smart-home platform.
#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub entity_id: String,
    pub state: Value,
}

/// The smart-home platform's entity registry and service-call surface
/// (§6). The core never fabricates entity ids; it only queries and caches
/// what this trait returns.
#[async_trait]
pub trait SmartHomePlatform: Send + Sync {
    async fn list_entities(&self) -> Result<Vec<EntityReference>>;
    async fn get_state(&self, entity_id: &str) -> Result<Value>;
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: &str,
        data: Value,
    ) -> Result<Value>;
    async fn subscribe_state_changes(&self) -> Result<tokio::sync::mpsc::Receiver<StateChangeEvent>>;
}

/// Message role for a language-model prompt turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Per-call parameters for a language-model invocation.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The language model collaborator (§6): text completion and embeddings,
/// each with its own model identifier per task class.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Opaque secret access (§6). The core never persists secrets itself.
#[async_trait]
pub trait Secrets: Send + Sync {
    async fn get(&self, name: &str) -> Result<Vec<u8>>;
}

/// Append-only audit sink with ordered per-conversation delivery (§6, §5).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
}

/// Notification channel used by the Safety Monitor (§4.12, §6).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, channel: &str, payload: Value) -> Result<()>;
}

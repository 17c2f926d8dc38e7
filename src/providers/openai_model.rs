//! HTTP-backed [`LanguageModel`] for the §6 model collaborator: an
//! OpenAI-compatible chat-completions and embeddings endpoint.
//!
//! Grounded on the teacher's `OpenAiAdapter` (`fae_llm::providers::openai`):
//! same `reqwest::Client` held behind the adapter struct, the same
//! bearer-header request shape, and the same status-code-to-error-kind
//! mapping — collapsed from the teacher's streaming `LlmEventStream` to a
//! single buffered `complete()` call per §6's `complete(messages, params)
//! → text` contract (this crate has no need for token-level streaming).

use async_trait::async_trait;
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::interfaces::{ChatMessage, CompletionParams, LanguageModel, MessageRole};

/// Configuration for an OpenAI-compatible endpoint. The same shape serves
/// OpenAI itself, Azure OpenAI-compatible proxies, and local servers
/// (Ollama, vLLM, llama.cpp) that speak the `/v1/chat/completions` and
/// `/v1/embeddings` surface.
#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub request_timeout_ms: u64,
}

impl OpenAiModelConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_owned(),
            embedding_model: "text-embedding-3-small".to_owned(),
            request_timeout_ms: 3_000,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// HTTP client for the language-model collaborator (§6).
pub struct OpenAiCompatibleModel {
    config: OpenAiModelConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleModel").field("base_url", &self.config.base_url).finish_non_exhaustive()
    }
}

impl OpenAiCompatibleModel {
    #[must_use]
    pub fn new(config: OpenAiModelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> CoreError {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => CoreError::PermanentExternal(format!("model auth failed: {message}")),
            429 | 500..=599 => CoreError::TransientExternal(format!("model HTTP {}: {message}", status.as_u16())),
            _ => CoreError::PermanentExternal(format!("model HTTP {}: {message}", status.as_u16())),
        }
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String> {
        let body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": messages.iter().map(|m| json!({"role": role_str(m.role), "content": m.content})).collect::<Vec<_>>(),
        });

        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("model request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| CoreError::InternalInvariant(format!("model response not JSON: {e}")))?;
        parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .ok_or_else(|| CoreError::InternalInvariant("model response missing choices[0].message.content".into()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.config.embedding_model, "input": text });
        let url = format!("{}/v1/embeddings", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("embedding request failed: {e}")))?;

        let status = response.status();
        let text_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_http_error(status, &text_body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|e| CoreError::InternalInvariant(format!("embedding response not JSON: {e}")))?;
        let values = parsed
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| CoreError::InternalInvariant("embedding response missing data[0].embedding".into()))?;

        values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| CoreError::InternalInvariant("embedding value not a number".into())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> CompletionParams {
        CompletionParams { model: "gpt-test".to_owned(), max_tokens: 64, temperature: 0.0 }
    }

    #[tokio::test]
    async fn complete_parses_chat_completion_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
            })))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(OpenAiModelConfig::new("sk-test").with_base_url(server.uri()));
        let messages = vec![ChatMessage { role: MessageRole::User, content: "hi".into() }];
        let text = model.complete(&messages, &params()).await.expect("complete");
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn complete_maps_401_to_permanent_external() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(OpenAiModelConfig::new("sk-test").with_base_url(server.uri()));
        let messages = vec![ChatMessage { role: MessageRole::User, content: "hi".into() }];
        let err = model.complete(&messages, &params()).await.unwrap_err();
        assert!(matches!(err, CoreError::PermanentExternal(_)));
    }

    #[tokio::test]
    async fn complete_maps_429_to_transient_external() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "rate limited"}})))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(OpenAiModelConfig::new("sk-test").with_base_url(server.uri()));
        let messages = vec![ChatMessage { role: MessageRole::User, content: "hi".into() }];
        let err = model.complete(&messages, &params()).await.unwrap_err();
        assert!(matches!(err, CoreError::TransientExternal(_)));
    }

    #[tokio::test]
    async fn embed_parses_embedding_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(OpenAiModelConfig::new("sk-test").with_base_url(server.uri()));
        let vec = model.embed("hello").await.expect("embed");
        assert_eq!(vec, vec![0.1_f32, 0.2, 0.3]);
    }
}

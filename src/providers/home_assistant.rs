//! HTTP-backed [`SmartHomePlatform`] for the §6 platform collaborator,
//! talking to a Home Assistant-shaped REST API (`/api/states`,
//! `/api/services/{domain}/{service}`, `/api/stream`).
//!
//! The core never fabricates entity ids (§4.2's Entity Reference note): this
//! adapter only translates Home Assistant's own `entity_id` / `attributes`
//! shape into [`EntityReference`] and passes service-call targets through
//! verbatim. Grounded on the same `reqwest::Client` + bearer-header request
//! shape as [`crate::providers::openai_model::OpenAiCompatibleModel`].

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};
use crate::interfaces::{SmartHomePlatform, StateChangeEvent};
use crate::model::EntityReference;

#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub request_timeout_ms: u64,
}

pub struct HomeAssistantPlatform {
    config: HomeAssistantConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HomeAssistantPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantPlatform").field("base_url", &self.config.base_url).finish_non_exhaustive()
    }
}

impl HomeAssistantPlatform {
    #[must_use]
    pub fn new(config: HomeAssistantConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.bearer_token)
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> CoreError {
        match status.as_u16() {
            401 | 403 => CoreError::PermanentExternal(format!("platform auth failed: {body}")),
            404 => CoreError::PermanentExternal(format!("platform entity not found: {body}")),
            429 | 500..=599 => CoreError::TransientExternal(format!("platform HTTP {}: {body}", status.as_u16())),
            _ => CoreError::PermanentExternal(format!("platform HTTP {}: {body}", status.as_u16())),
        }
    }
}

/// Home Assistant's area/domain are not first-class on every state entry;
/// fall back to deriving the domain from the entity id's `domain.object_id`
/// shape and treating state attributes `area_id`/`floor_id`/`groups` (if
/// present) as the area/floor/named-group tags.
fn to_entity_reference(state: &Value) -> Option<EntityReference> {
    let entity_id = state.get("entity_id")?.as_str()?.to_owned();
    let domain = entity_id.split('.').next().unwrap_or("unknown").to_owned();
    let display_name = state
        .get("attributes")
        .and_then(|a| a.get("friendly_name"))
        .and_then(|n| n.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| entity_id.clone());
    let area = state
        .get("attributes")
        .and_then(|a| a.get("area_id"))
        .and_then(|n| n.as_str())
        .map(str::to_owned);
    let floor = state
        .get("attributes")
        .and_then(|a| a.get("floor_id"))
        .and_then(|n| n.as_str())
        .map(str::to_owned);
    let groups = state
        .get("attributes")
        .and_then(|a| a.get("groups"))
        .and_then(|g| g.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    Some(EntityReference { entity_id, display_name, area, domain, floor, groups })
}

#[async_trait]
impl SmartHomePlatform for HomeAssistantPlatform {
    async fn list_entities(&self) -> Result<Vec<EntityReference>> {
        let url = format!("{}/api/states", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("list_entities failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }
        let states: Vec<Value> = serde_json::from_str(&text)
            .map_err(|e| CoreError::InternalInvariant(format!("list_entities response not JSON array: {e}")))?;
        Ok(states.iter().filter_map(to_entity_reference).collect())
    }

    async fn get_state(&self, entity_id: &str) -> Result<Value> {
        let url = format!("{}/api/states/{entity_id}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("get_state failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| CoreError::InternalInvariant(format!("get_state response not JSON: {e}")))
    }

    async fn call_service(&self, domain: &str, service: &str, target: &str, data: Value) -> Result<Value> {
        let url = format!("{}/api/services/{domain}/{service}", self.config.base_url);
        let mut body = data;
        if let Value::Object(ref mut map) = body {
            map.entry("entity_id").or_insert_with(|| Value::String(target.to_owned()));
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("call_service failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }
        serde_json::from_str(&text).or_else(|_| Ok(Value::Null))
    }

    async fn subscribe_state_changes(&self) -> Result<mpsc::Receiver<StateChangeEvent>> {
        let url = format!("{}/api/stream", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("subscribe_state_changes failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }

        let (tx, rx) = mpsc::channel(64);
        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(idx) = buf.find('\n') {
                    let line = buf[..idx].to_owned();
                    buf.drain(..=idx);
                    let Some(payload) = line.strip_prefix("data: ") else { continue };
                    let Ok(event) = serde_json::from_str::<Value>(payload) else { continue };
                    if event.get("event_type").and_then(|t| t.as_str()) != Some("state_changed") {
                        continue;
                    }
                    let Some(entity_id) = event
                        .get("data")
                        .and_then(|d| d.get("entity_id"))
                        .and_then(|e| e.as_str())
                        .map(str::to_owned)
                    else {
                        continue;
                    };
                    let state = event.get("data").and_then(|d| d.get("new_state")).cloned().unwrap_or(Value::Null);
                    if tx.send(StateChangeEvent { entity_id, state }).await.is_err() {
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

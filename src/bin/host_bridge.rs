//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads newline-delimited JSON [`barnabee::Request`] messages from stdin,
//! runs each through the [`barnabee::Orchestrator`], and writes the
//! resulting [`barnabee::Response`] as a newline-delimited JSON message to
//! stdout. All diagnostic output goes to stderr so stdout remains a clean
//! JSON protocol channel — the same split the teacher's stdio bridge uses.
//!
//! Collaborators are wired from `CoreConfig` plus [`FileSecrets`]: a
//! Home Assistant-shaped platform, an OpenAI-compatible model (optional —
//! the core degrades to pattern/heuristic-only classification and a
//! graceful Conversation-handler failure without one), a segmented file
//! audit log, and a webhook notification sink.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use barnabee::config::CoreConfig;
use barnabee::error::{CoreError, Result};
use barnabee::interfaces::{AuditSink, LanguageModel, NotificationSink, Secrets, SmartHomePlatform};
use barnabee::memory::MemoryStore;
use barnabee::orchestrator::Orchestrator;
use barnabee::overrides::{self, OverrideStore};
use barnabee::pattern::{self, PatternStore};
use barnabee::paths;
use barnabee::providers::{FileAuditSink, FileSecrets, HomeAssistantPlatform, OpenAiCompatibleModel, WebhookNotificationSink};
use barnabee::providers::home_assistant::HomeAssistantConfig;
use barnabee::providers::openai_model::OpenAiModelConfig;
use barnabee::{Request, Response};

/// Used when no notification webhook secret is configured: the Safety
/// Monitor still runs, it simply has nowhere to deliver an alert.
struct NoopNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, channel: &str, _payload: serde_json::Value) -> Result<()> {
        tracing::warn!(channel, "no notification sink configured; dropping safety alert");
        Ok(())
    }
}

async fn build_orchestrator() -> Result<Orchestrator> {
    let config = CoreConfig::load_or_default(&paths::config_file())?;

    std::fs::create_dir_all(paths::config_dir())?;
    std::fs::create_dir_all(paths::data_dir())?;
    let secrets = FileSecrets::new(paths::config_dir().join("secrets"));

    let patterns = Arc::new(PatternStore::new(pattern::load_or_seed(std::path::Path::new(&config.patterns.path))?));
    let overrides = Arc::new(OverrideStore::new(overrides::load_from_path(std::path::Path::new(&config.overrides.path))?));

    let model: Option<Arc<dyn LanguageModel>> = match secrets.get("openai_api_key").await {
        Ok(key) => {
            let api_key = String::from_utf8_lossy(&key).into_owned();
            let base_url = std::env::var("BARNABEE_MODEL_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_owned());
            Some(Arc::new(OpenAiCompatibleModel::new(OpenAiModelConfig::new(api_key).with_base_url(base_url))))
        }
        Err(e) => {
            tracing::warn!(error = %e, "no language-model secret configured; classification and conversation fall back to pattern/canned behavior");
            None
        }
    };

    let platform: Arc<dyn SmartHomePlatform> = match secrets.get("home_assistant_token").await {
        Ok(token) => {
            let bearer_token = String::from_utf8_lossy(&token).into_owned();
            let base_url = std::env::var("BARNABEE_PLATFORM_BASE_URL")
                .map_err(|_| CoreError::Config("BARNABEE_PLATFORM_BASE_URL is required when a platform token is configured".into()))?;
            Arc::new(HomeAssistantPlatform::new(HomeAssistantConfig { base_url, bearer_token, request_timeout_ms: 3_000 }))
        }
        Err(e) => return Err(CoreError::Config(format!("smart-home platform secret unavailable: {e}"))),
    };

    let memory_store = Arc::new(MemoryStore::new(&paths::memory_dir())?);
    let audit: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new(paths::audit_dir())?);
    let notifications: Arc<dyn NotificationSink> = match secrets.get("notification_webhook_url").await {
        Ok(url) => Arc::new(WebhookNotificationSink::new(String::from_utf8_lossy(&url).into_owned())),
        Err(_) => Arc::new(NoopNotificationSink),
    };

    Ok(Orchestrator::new(config, patterns, overrides, model, platform, memory_store, audit, notifications))
}

async fn write_line(writer: &mut (impl AsyncWriteExt + Unpin), line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("barnabee-host starting");

    let orchestrator = build_orchestrator().await.map_err(|e| {
        tracing::error!(error = %e, "failed to build orchestrator");
        anyhow::anyhow!("barnabee-host failed to start: {e}")
    })?;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed request line");
                continue;
            }
        };

        let response: Response = match orchestrator.process(request.clone()).await {
            Ok(response) => response,
            Err(CoreError::Busy) => Response {
                text: "I'm handling too many requests right now. Please try again in a moment.".to_owned(),
                intent: barnabee::model::Intent::Unknown,
                handler: "busy".to_owned(),
                latency_ms: 0,
                trace_id: request.id,
            },
            Err(e) => {
                tracing::error!(error = %e, "unexpected orchestrator error");
                continue;
            }
        };

        let json = serde_json::to_string(&response)?;
        write_line(&mut stdout, &json).await?;
    }

    tracing::info!("barnabee-host shut down cleanly");
    Ok(())
}

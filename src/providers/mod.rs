//! Concrete, network-backed implementations of the §6 external-collaborator
//! traits declared in [`crate::interfaces`]. Nothing in the pipeline itself
//! depends on this module — it exists so [`crate::bin`] binaries have a real
//! deployment to wire up instead of the test-only mocks in
//! `interfaces::mocks`.
//!
//! Grounded on the teacher's `fae_llm::providers::openai::OpenAiAdapter`:
//! one `reqwest::Client` per collaborator, a typed config struct, and a
//! single `map_http_error` choke point that turns an HTTP status into the
//! crate's own error taxonomy rather than leaking `reqwest::Error`.

pub mod audit_log;
pub mod home_assistant;
pub mod notify_webhook;
pub mod openai_model;
pub mod secrets_file;

pub use audit_log::FileAuditSink;
pub use home_assistant::HomeAssistantPlatform;
pub use notify_webhook::WebhookNotificationSink;
pub use openai_model::OpenAiCompatibleModel;
pub use secrets_file::FileSecrets;

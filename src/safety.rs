//! C12 Safety Monitor (§4.12). Runs alongside the selected handler over
//! the raw utterance whenever the speaker is in the configured "minor"
//! set, scanning for distress/abuse patterns. On match, emits a
//! structured alert to the notification sink and reports that the audit
//! entry should be flagged — it never alters the user-visible response.
//!
//! Grounded on the teacher's `pattern`-compilation shape (a list of
//! regexes compiled once, scanned in order) rather than introducing a
//! second regex engine or compilation strategy.

use std::sync::Arc;

use regex::Regex;
use serde_json::json;

use crate::config::SafetyConfig;
use crate::interfaces::NotificationSink;
use crate::model::Request;

/// A compiled distress/abuse pattern. A pattern that fails to compile is
/// dropped with a load-time warning rather than aborting startup — the
/// monitor is best-effort and additive, never load-bearing for request
/// handling (§4.12: "never blocks").
pub struct SafetyMonitor {
    minors: Vec<String>,
    patterns: Vec<Regex>,
    notification_channel: String,
}

impl SafetyMonitor {
    #[must_use]
    pub fn new(config: &SafetyConfig) -> Self {
        let patterns = config
            .distress_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "safety pattern failed to compile, skipping");
                    None
                }
            })
            .collect();
        Self { minors: config.minors.clone(), patterns, notification_channel: config.notification_channel.clone() }
    }

    fn is_monitored_speaker(&self, speaker_id: Option<&str>) -> bool {
        speaker_id.is_some_and(|s| self.minors.iter().any(|m| m == s))
    }

    /// Scan `request`'s raw utterance. Returns `true` if a distress/abuse
    /// pattern matched (the caller should flag the audit entry), having
    /// already dispatched the alert to `sink` on a match.
    pub async fn scan(&self, request: &Request, sink: &Arc<dyn NotificationSink>) -> bool {
        if !self.is_monitored_speaker(request.speaker_id.as_deref()) {
            return false;
        }
        let Some(matched) = self.patterns.iter().find(|p| p.is_match(&request.utterance)) else {
            return false;
        };

        let payload = json!({
            "request_id": request.id,
            "speaker_id": request.speaker_id,
            "room_id": request.room_id,
            "matched_pattern": matched.as_str(),
        });
        if let Err(e) = sink.notify(&self.notification_channel, payload).await {
            tracing::warn!(error = %e, "safety monitor failed to deliver alert notification");
        }
        true
    }
}

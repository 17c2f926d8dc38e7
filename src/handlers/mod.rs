//! Intent-specific handlers (C8–C11) and the routing table that selects
//! one per classified [`Intent`], honoring `RoutingConfig.overrides`
//! (§6: "intent → handler routing table (hot-reloadable)").

pub mod action;
pub mod conversation;
pub mod instant;
pub mod memory_op;

use crate::config::RoutingConfig;
use crate::model::Intent;

/// The four dispatch targets a classified intent can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Instant,
    Action,
    Conversation,
    MemoryOp,
}

impl HandlerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Instant => "instant",
            HandlerKind::Action => "action",
            HandlerKind::Conversation => "conversation",
            HandlerKind::MemoryOp => "memory_op",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "instant" => HandlerKind::Instant,
            "action" => HandlerKind::Action,
            "conversation" => HandlerKind::Conversation,
            "memory_op" => HandlerKind::MemoryOp,
            _ => return None,
        })
    }
}

/// Default intent → handler mapping before any configured override is
/// applied. Query and Gesture currently route through Conversation
/// (handled as open-ended fallback) pending a dedicated handler.
fn default_handler_for(intent: Intent) -> HandlerKind {
    match intent {
        Intent::Instant => HandlerKind::Instant,
        Intent::Action => HandlerKind::Action,
        Intent::Conversation | Intent::Query | Intent::Gesture | Intent::Unknown => HandlerKind::Conversation,
        Intent::Memory => HandlerKind::MemoryOp,
        Intent::Emergency => HandlerKind::Conversation,
    }
}

/// Resolve which handler should serve `intent`, applying a configured
/// override (keyed by the intent's snake_case name) if present and valid.
/// An override naming an unrecognized handler is ignored and logged, not
/// fatal (§4.2's "never abort on a malformed config entry" posture,
/// carried here for routing config).
#[must_use]
pub fn resolve_handler(intent: Intent, routing: &RoutingConfig) -> HandlerKind {
    let intent_name = format!("{intent:?}").to_ascii_lowercase();
    if let Some(override_name) = routing.overrides.get(&intent_name) {
        match HandlerKind::from_str(override_name) {
            Some(kind) => return kind,
            None => {
                tracing::warn!(intent = %intent_name, override_name, "routing override names an unknown handler, ignoring");
            }
        }
    }
    default_handler_for(intent)
}

//! Error taxonomy for the orchestration core.
//!
//! The kinds mirror the failure-policy table in the design notes: each
//! variant maps to exactly one recovery policy enforced by the orchestrator
//! or by the component that raises it. Handlers never let these escape —
//! they are caught and folded into a [`crate::model::HandlerResult`]; only
//! hard capacity rejections reach the caller of [`crate::process`].

/// Top-level error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Network timeout, 5xx, rate limit — retried with capped backoff
    /// within the call's own deadline before falling back.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// 4xx, authentication failure, schema mismatch from an external
    /// collaborator — never retried.
    #[error("permanent external error: {0}")]
    PermanentExternal(String),

    /// Empty utterance, oversized utterance, invalid encoding.
    #[error("malformed input: {0}")]
    InputMalformed(String),

    /// Score out of range, vector dimension mismatch, missing required
    /// field — an invariant this crate is supposed to guarantee broke.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// A deadline elapsed before the stage completed. Always recoverable,
    /// always logged by the caller.
    #[error("deadline exceeded: {0}")]
    Deadline(String),

    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// Memory store error (schema, query, persistence).
    #[error("memory store error: {0}")]
    Memory(String),

    /// Pattern set compile/load error.
    #[error("pattern set error: {0}")]
    PatternSet(String),

    /// The orchestrator is at its backpressure bound.
    #[error("busy: too many in-flight requests")]
    Busy,

    /// I/O error, converted automatically via `?`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for errors that should be retried with backoff before giving up.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::TransientExternal(_) | CoreError::Deadline(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Long-term memory subsystem (§3, §4.6, §4.7): a SQLite-backed store with
//! a vector-embedding sidecar, decay/retrieval scoring math, and the C6/C7
//! components built on top of it.
//!
//! Sub-modules:
//! - `schema`: SQLite DDL.
//! - `store`: `MemoryStore`, the C7 Memory Writer (create/soft-delete/
//!   reinforce/maintenance) plus the embedding sidecar operations.
//! - `scoring`: pure decay/importance/retrieval-score math (§3, §4.6).
//! - `retrieval`: `MemoryRetriever`, the C6 Memory Retriever.

mod retrieval;
mod schema;
mod scoring;
mod store;

pub use retrieval::{MemoryRetriever, Scored};
pub use schema::EMBEDDING_DIM;
pub use scoring::{access_bonus, cosine_similarity, decay_factor, effective_importance, retrieval_score};
pub use store::{MaintenanceReport, MemoryFilters, MemoryStore};

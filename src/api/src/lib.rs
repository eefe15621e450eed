//! Keiba knowledge cache and scoring engine.
//!
//! Per-horse race histories are published as a partitioned snapshot (an
//! index plus immutable chunks), served through a bounded LRU chunk cache,
//! and scored on demand into a 12-metric vector with aggregate and grade.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod knowledge;
pub mod retry;
pub mod scoring;
pub mod types;

pub use coordinator::ScoringService;
pub use error::{FailureReason, KnowledgeError, KnowledgeResult};

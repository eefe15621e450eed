//! Response types for the scoring query surface.

use serde::Serialize;

use crate::error::FailureReason;
use crate::knowledge::record::TrackCondition;
use crate::scoring::{Grade, MetricScore};

/// A scored horse, ranked within its batch
#[derive(Debug, Clone, Serialize)]
pub struct ScoredHorse {
    /// 1-based, by aggregate descending
    pub rank: usize,
    pub name: String,
    pub aggregate: f64,
    pub grade: Grade,
    pub metrics: Vec<MetricScore>,
    /// Metrics that fell back to the neutral value
    pub defaulted: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reference: bool,
    pub races: usize,
}

/// A requested horse that could not be scored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedHorse {
    pub name: String,
    pub reason: FailureReason,
    pub message: String,
}

/// Cache effectiveness and timing for one call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchMetadata {
    pub requested: usize,
    pub scored: usize,
    pub not_found: usize,
    /// Entities served from a resident chunk or the fallback memo
    pub cache_hits: usize,
    /// Distinct chunks loaded for this call
    pub chunk_loads: usize,
    /// Entities that required a full snapshot scan
    pub fallback_lookups: usize,
    pub baseline_hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<TrackCondition>,
    pub total_ms: f64,
    pub avg_ms_per_entity: f64,
    /// Time spent in the streaming fallback, reported apart from the average
    pub fallback_ms: f64,
}

/// Result of a single or batch scoring call
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResponse {
    pub scored: Vec<ScoredHorse>,
    pub not_found: Vec<FailedHorse>,
    pub metadata: BatchMetadata,
}

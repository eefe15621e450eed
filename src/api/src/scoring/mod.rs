//! Deterministic 12-metric scoring.

pub mod engine;
pub mod metrics;
pub mod tables;

pub use engine::{MetricScore, ScoreEngine, ScoreVector};
pub use metrics::Metric;
pub use tables::{Grade, MetricMultipliers};

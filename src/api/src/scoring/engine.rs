//! Score computation: race history to a 12-metric vector, aggregate and grade.

use serde::Serialize;

use super::metrics::Metric;
use super::tables::{
    Grade, MetricMultipliers, MAX_SCORE, METRIC_WEIGHTS, MIN_SCORE, NEUTRAL_SCORE, REFERENCE_SCORE,
};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::record::{HorseProfile, RaceRecord, TrackCondition};

/// One metric's value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricScore {
    pub metric: Metric,
    pub value: f64,
    /// Inputs were absent across the whole history; `value` is neutral
    pub defaulted: bool,
}

/// Twelve metric scores with their aggregate and grade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreVector {
    pub metrics: Vec<MetricScore>,
    pub aggregate: f64,
    pub grade: Grade,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<TrackCondition>,
    /// Baseline horse: fixed reference values, no history consulted
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reference: bool,
}

impl ScoreVector {
    /// The calibration anchor: every metric and the aggregate at the top.
    pub fn reference(condition: Option<TrackCondition>) -> Self {
        Self {
            metrics: Metric::ALL
                .iter()
                .map(|&metric| MetricScore {
                    metric,
                    value: REFERENCE_SCORE,
                    defaulted: false,
                })
                .collect(),
            aggregate: REFERENCE_SCORE,
            grade: Grade::S,
            condition,
            reference: true,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricScore> {
        self.metrics.iter().find(|m| m.metric == metric)
    }

    pub fn defaulted_count(&self) -> usize {
        self.metrics.iter().filter(|m| m.defaulted).count()
    }
}

/// Weighted mean over the constant weight table, clamped to the scale.
pub fn aggregate(metrics: &[MetricScore]) -> f64 {
    let (weighted, total) = metrics.iter().fold((0.0, 0.0), |(sum, total), m| {
        let weight = METRIC_WEIGHTS[m.metric.index()];
        (sum + m.value * weight, total + weight)
    });
    if total == 0.0 {
        return NEUTRAL_SCORE;
    }
    (weighted / total).clamp(MIN_SCORE, MAX_SCORE)
}

/// Compute all twelve metrics under a multiplier table.
///
/// Defaulted metrics stay neutral regardless of the multiplier.
pub fn compute(races: &[RaceRecord], multipliers: &MetricMultipliers) -> Vec<MetricScore> {
    Metric::ALL
        .iter()
        .map(|&metric| match metric.compute(races) {
            Some(value) => MetricScore {
                metric,
                value: (value * multipliers.factor(metric)).clamp(MIN_SCORE, MAX_SCORE),
                defaulted: false,
            },
            None => MetricScore {
                metric,
                value: NEUTRAL_SCORE,
                defaulted: true,
            },
        })
        .collect()
}

/// Pure scoring over immutable profiles
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    baseline: String,
}

impl ScoreEngine {
    pub fn new(baseline: impl Into<String>) -> Self {
        Self {
            baseline: baseline.into(),
        }
    }

    pub fn is_baseline(&self, name: &str) -> bool {
        name == self.baseline
    }

    /// Standard score.
    pub fn score(&self, name: &str, profile: &HorseProfile) -> KnowledgeResult<ScoreVector> {
        self.score_with(name, profile, &MetricMultipliers::IDENTITY, None)
    }

    /// Score adjusted for the going.
    pub fn score_under(
        &self,
        name: &str,
        profile: &HorseProfile,
        condition: TrackCondition,
    ) -> KnowledgeResult<ScoreVector> {
        let multipliers = MetricMultipliers::for_condition(condition);
        self.score_with(name, profile, &multipliers, Some(condition))
    }

    /// Shared path for standard and condition-adjusted scoring.
    pub fn score_with(
        &self,
        name: &str,
        profile: &HorseProfile,
        multipliers: &MetricMultipliers,
        condition: Option<TrackCondition>,
    ) -> KnowledgeResult<ScoreVector> {
        if self.is_baseline(name) {
            return Ok(ScoreVector::reference(condition));
        }
        if !profile.has_history() {
            return Err(KnowledgeError::not_found(name));
        }

        let metrics = compute(&profile.races, multipliers);
        let aggregate = aggregate(&metrics);
        Ok(ScoreVector {
            metrics,
            aggregate,
            grade: Grade::from_score(aggregate),
            condition,
            reference: false,
        })
    }
}

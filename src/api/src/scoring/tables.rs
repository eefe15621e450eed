//! Calibration constants: metric weights, grade thresholds and
//! track-condition multipliers.

use serde::Serialize;

use super::metrics::Metric;
use crate::knowledge::record::TrackCondition;

/// Value substituted for a metric whose inputs are absent
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Score of the baseline horse, the top of the scale
pub const REFERENCE_SCORE: f64 = 100.0;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// One weight per metric, in [`Metric::ALL`] order
pub const METRIC_WEIGHTS: [f64; Metric::COUNT] = [
    1.2, // distance_aptitude
    1.5, // win_rate
    1.3, // place_rate
    1.4, // recent_form
    0.6, // carried_weight
    0.5, // body_weight_stability
    0.9, // jockey_affinity
    0.7, // trainer_affinity
    1.0, // closing_kick
    1.1, // speed_index
    0.8, // market_support
    0.6, // market_outperformance
];

/// Ordinal grade label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    S,
    A,
    B,
    C,
    D,
    E,
}

/// Ascending lower bounds; below the first is grade E
pub const GRADE_THRESHOLDS: [(f64, Grade); 5] = [
    (40.0, Grade::D),
    (50.0, Grade::C),
    (60.0, Grade::B),
    (70.0, Grade::A),
    (80.0, Grade::S),
];

impl Grade {
    pub fn from_score(score: f64) -> Self {
        GRADE_THRESHOLDS
            .iter()
            .rev()
            .find(|(bound, _)| score >= *bound)
            .map(|(_, grade)| *grade)
            .unwrap_or(Grade::E)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
        }
    }
}

/// Per-metric multipliers for a track condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricMultipliers {
    factors: [f64; Metric::COUNT],
}

impl MetricMultipliers {
    /// Standard scoring
    pub const IDENTITY: MetricMultipliers = MetricMultipliers {
        factors: [1.0; Metric::COUNT],
    };

    /// Metrics a track condition may adjust
    pub const CONDITION_SENSITIVE: [Metric; 5] = [
        Metric::SpeedIndex,
        Metric::ClosingKick,
        Metric::DistanceAptitude,
        Metric::CarriedWeight,
        Metric::RecentForm,
    ];

    /// Build a table from factors for the condition-sensitive metrics,
    /// in [`Self::CONDITION_SENSITIVE`] order.
    fn sensitive(speed: f64, kick: f64, distance: f64, weight: f64, form: f64) -> Self {
        let mut factors = [1.0; Metric::COUNT];
        factors[Metric::SpeedIndex as usize] = speed;
        factors[Metric::ClosingKick as usize] = kick;
        factors[Metric::DistanceAptitude as usize] = distance;
        factors[Metric::CarriedWeight as usize] = weight;
        factors[Metric::RecentForm as usize] = form;
        Self { factors }
    }

    pub fn for_condition(condition: TrackCondition) -> Self {
        match condition {
            TrackCondition::Firm => Self::IDENTITY,
            TrackCondition::Good => Self::sensitive(0.97, 1.02, 0.98, 0.98, 0.99),
            TrackCondition::Yielding => Self::sensitive(0.93, 1.04, 0.96, 0.95, 0.98),
            TrackCondition::Heavy => Self::sensitive(0.88, 1.06, 0.93, 0.90, 0.96),
        }
    }

    pub fn factor(&self, metric: Metric) -> f64 {
        self.factors[metric.index()]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

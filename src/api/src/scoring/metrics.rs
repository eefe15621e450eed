//! The twelve metric functions.
//!
//! Each reads a most-recent-first race history and returns a value on the
//! 0-100 scale, or `None` when the fields it needs are absent from every
//! race. Neutral substitution happens in the engine, not here.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::knowledge::record::{DistanceBucket, RaceRecord, Surface};

/// The twelve scored metrics, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    DistanceAptitude,
    WinRate,
    PlaceRate,
    RecentForm,
    CarriedWeight,
    BodyWeightStability,
    JockeyAffinity,
    TrainerAffinity,
    ClosingKick,
    SpeedIndex,
    MarketSupport,
    MarketOutperformance,
}

impl Metric {
    pub const COUNT: usize = 12;

    pub const ALL: [Metric; Metric::COUNT] = [
        Metric::DistanceAptitude,
        Metric::WinRate,
        Metric::PlaceRate,
        Metric::RecentForm,
        Metric::CarriedWeight,
        Metric::BodyWeightStability,
        Metric::JockeyAffinity,
        Metric::TrainerAffinity,
        Metric::ClosingKick,
        Metric::SpeedIndex,
        Metric::MarketSupport,
        Metric::MarketOutperformance,
    ];

    /// Position in [`Metric::ALL`] and in every per-metric table.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::DistanceAptitude => "distance_aptitude",
            Metric::WinRate => "win_rate",
            Metric::PlaceRate => "place_rate",
            Metric::RecentForm => "recent_form",
            Metric::CarriedWeight => "carried_weight",
            Metric::BodyWeightStability => "body_weight_stability",
            Metric::JockeyAffinity => "jockey_affinity",
            Metric::TrainerAffinity => "trainer_affinity",
            Metric::ClosingKick => "closing_kick",
            Metric::SpeedIndex => "speed_index",
            Metric::MarketSupport => "market_support",
            Metric::MarketOutperformance => "market_outperformance",
        }
    }

    pub fn compute(self, races: &[RaceRecord]) -> Option<f64> {
        match self {
            Metric::DistanceAptitude => distance_aptitude(races),
            Metric::WinRate => win_rate(races),
            Metric::PlaceRate => place_rate(races),
            Metric::RecentForm => recent_form(races),
            Metric::CarriedWeight => carried_weight(races),
            Metric::BodyWeightStability => body_weight_stability(races),
            Metric::JockeyAffinity => jockey_affinity(races),
            Metric::TrainerAffinity => trainer_affinity(races),
            Metric::ClosingKick => closing_kick(races),
            Metric::SpeedIndex => speed_index(races),
            Metric::MarketSupport => market_support(races),
            Metric::MarketOutperformance => market_outperformance(races),
        }
    }
}

/// Races considered by recency-weighted metrics
pub const RECENT_WINDOW: usize = 5;

/// Reference carried weight in kg
pub const REFERENCE_WEIGHT: f64 = 55.0;

/// Recency weights, newest first
const RECENT_WEIGHTS: [f64; RECENT_WINDOW] = [5.0, 4.0, 3.0, 2.0, 1.0];

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Average finish position to score: 1st is 100, each place below costs 10.
fn finish_score(avg_position: f64) -> f64 {
    clamp(100.0 - (avg_position - 1.0) * 10.0)
}

fn positions(races: &[RaceRecord]) -> impl Iterator<Item = f64> + '_ {
    races.iter().filter_map(|r| r.finish_position).map(f64::from)
}

/// Best per-bucket average finish, preferring buckets with two or more runs.
pub fn distance_aptitude(races: &[RaceRecord]) -> Option<f64> {
    let mut buckets: BTreeMap<DistanceBucket, Vec<f64>> = BTreeMap::new();
    for race in races {
        if let (Some(distance), Some(position)) = (race.distance, race.finish_position) {
            buckets
                .entry(DistanceBucket::from_distance(distance))
                .or_default()
                .push(f64::from(position));
        }
    }

    let best = |min_runs: usize| {
        buckets
            .values()
            .filter(|p| p.len() >= min_runs)
            .filter_map(|p| mean(p.iter().copied()))
            .min_by(|a, b| a.total_cmp(b))
    };
    best(2).or_else(|| best(1)).map(finish_score)
}

/// Win rate; 40% or better scores 100.
pub fn win_rate(races: &[RaceRecord]) -> Option<f64> {
    let rate = mean(positions(races).map(|p| if p == 1.0 { 1.0 } else { 0.0 }))?;
    Some(clamp(rate * 250.0))
}

/// Top-three rate; two thirds or better scores 100.
pub fn place_rate(races: &[RaceRecord]) -> Option<f64> {
    let rate = mean(positions(races).map(|p| if p <= 3.0 { 1.0 } else { 0.0 }))?;
    Some(clamp(rate * 150.0))
}

/// Recency-weighted finish over the last five placed runs.
pub fn recent_form(races: &[RaceRecord]) -> Option<f64> {
    let (weighted, total) = positions(races)
        .take(RECENT_WINDOW)
        .zip(RECENT_WEIGHTS)
        .fold((0.0, 0.0), |(sum, total), (p, w)| (sum + p * w, total + w));
    (total > 0.0).then(|| finish_score(weighted / total))
}

/// Lighter recent imposts than the reference score higher.
pub fn carried_weight(races: &[RaceRecord]) -> Option<f64> {
    let avg = mean(
        races
            .iter()
            .filter_map(|r| r.weight_carried)
            .take(RECENT_WINDOW),
    )?;
    Some(clamp(50.0 + (REFERENCE_WEIGHT - avg) * 10.0))
}

/// Small body-weight swings between runs score high.
pub fn body_weight_stability(races: &[RaceRecord]) -> Option<f64> {
    let avg_swing = mean(
        races
            .iter()
            .filter_map(|r| r.weight_change)
            .map(|c| f64::from(c.abs())),
    )?;
    Some(clamp(100.0 - avg_swing * 5.0))
}

/// Average finish across races run with the key returned by `pick`, taking
/// the most recent race's value as the current partner.
fn partner_affinity(races: &[RaceRecord], pick: fn(&RaceRecord) -> Option<&str>) -> Option<f64> {
    let current = races.iter().find_map(pick)?;
    let avg = mean(
        races
            .iter()
            .filter(|r| pick(r) == Some(current))
            .filter_map(|r| r.finish_position)
            .map(f64::from),
    )?;
    Some(finish_score(avg))
}

/// Finishing record with the most recent jockey.
pub fn jockey_affinity(races: &[RaceRecord]) -> Option<f64> {
    partner_affinity(races, |r| r.jockey_id.as_deref())
}

/// Finishing record with the most recent trainer.
pub fn trainer_affinity(races: &[RaceRecord]) -> Option<f64> {
    partner_affinity(races, |r| r.trainer_id.as_deref())
}

/// Places gained from the final corner to the line.
pub fn closing_kick(races: &[RaceRecord]) -> Option<f64> {
    let avg_gain = mean(races.iter().filter_map(|r| {
        let last_corner = *r.corner_positions.last()?;
        let finish = r.finish_position?;
        Some(f64::from(last_corner) - f64::from(finish))
    }))?;
    Some(clamp(50.0 + avg_gain * 10.0))
}

/// Expected seconds per 200m for a surface and distance.
fn pace_norm(surface: Surface, distance: u32) -> f64 {
    let base = match surface {
        Surface::Turf => 11.9,
        Surface::Dirt => 12.4,
        Surface::Obstacle => 13.8,
    };
    base + (f64::from(distance) - 1600.0) / 1000.0 * 0.2
}

/// Pace per 200m against the surface/distance norm.
pub fn speed_index(races: &[RaceRecord]) -> Option<f64> {
    let avg_margin = mean(races.iter().filter_map(|r| {
        let time = r.finish_time?;
        let distance = r.distance.filter(|&d| d > 0)?;
        let pace = time / (f64::from(distance) / 200.0);
        Some(pace_norm(r.surface.unwrap_or(Surface::Turf), distance) - pace)
    }))?;
    Some(clamp(50.0 + avg_margin * 50.0))
}

/// How strongly the market has backed the horse.
pub fn market_support(races: &[RaceRecord]) -> Option<f64> {
    let avg = mean(races.iter().filter_map(|r| r.popularity).map(f64::from))?;
    Some(clamp(100.0 - (avg - 1.0) * 10.0))
}

/// Finishing better than the betting rank implied.
pub fn market_outperformance(races: &[RaceRecord]) -> Option<f64> {
    let avg_beat = mean(races.iter().filter_map(|r| {
        Some(f64::from(r.popularity?) - f64::from(r.finish_position?))
    }))?;
    Some(clamp(50.0 + avg_beat * 8.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::record::fixtures::race;

    fn bare(position: u8) -> RaceRecord {
        RaceRecord {
            finish_position: Some(position),
            ..Default::default()
        }
    }

    #[test]
    fn test_metric_order_matches_index() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
        let json = serde_json::to_string(&Metric::BodyWeightStability).unwrap();
        assert_eq!(json, format!("\"{}\"", Metric::BodyWeightStability.name()));
    }

    #[test]
    fn test_missing_fields_yield_none() {
        let races = vec![RaceRecord::default(), RaceRecord::default()];
        assert_eq!(win_rate(&races), None);
        assert_eq!(distance_aptitude(&races), None);
        assert_eq!(closing_kick(&races), None);
        assert_eq!(speed_index(&races), None);
        assert_eq!(jockey_affinity(&races), None);
        assert_eq!(market_outperformance(&races), None);
    }

    #[test]
    fn test_win_and_place_rate() {
        let races: Vec<_> = [1, 3, 1, 5, 2].into_iter().map(bare).collect();
        assert!((win_rate(&races).unwrap() - 100.0).abs() < 1e-9); // 40%
        assert!((place_rate(&races).unwrap() - 100.0).abs() < 1e-9); // 80%, capped

        let races: Vec<_> = [4, 6, 1, 8, 9, 10, 5, 7, 11, 12].into_iter().map(bare).collect();
        assert!((win_rate(&races).unwrap() - 25.0).abs() < 1e-9);
        assert!((place_rate(&races).unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_recent_form_weights_newest_most() {
        let improving: Vec<_> = [1, 5, 5, 5, 5].into_iter().map(bare).collect();
        let declining: Vec<_> = [5, 5, 5, 5, 1].into_iter().map(bare).collect();
        assert!(recent_form(&improving).unwrap() > recent_form(&declining).unwrap());
        assert!((recent_form(&[bare(1)]).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_aptitude_prefers_repeated_bucket() {
        let mut sprint_win = race("2024-01-01", 1);
        sprint_win.distance = Some(1200);
        let mile = vec![race("2023-12-01", 3), race("2023-11-01", 3)];
        let races: Vec<_> = std::iter::once(sprint_win).chain(mile).collect();
        // One-off sprint win ignored in favour of the two mile runs
        assert!((distance_aptitude(&races).unwrap() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_closing_kick_and_outperformance() {
        let mut r = race("2024-01-01", 2);
        r.corner_positions = vec![10, 9, 8, 6];
        r.popularity = Some(7);
        assert!((closing_kick(&[r.clone()]).unwrap() - 90.0).abs() < 1e-9);
        assert!((market_outperformance(&[r]).unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_index_at_norm_is_neutral() {
        let mut r = race("2024-01-01", 1);
        r.distance = Some(1600);
        r.finish_time = Some(11.9 * 8.0);
        assert!((speed_index(&[r]).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_affinity_uses_latest_partner() {
        let mut latest = race("2024-02-01", 1);
        latest.jockey_id = Some("J2".to_string());
        let mut older = race("2024-01-01", 9);
        older.jockey_id = Some("J1".to_string());
        assert!((jockey_affinity(&[latest, older]).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_are_clamped() {
        let mut r = bare(1);
        r.weight_carried = Some(40.0);
        r.weight_change = Some(-40);
        assert_eq!(carried_weight(&[r.clone()]), Some(100.0));
        assert_eq!(body_weight_stability(&[r]), Some(0.0));
    }
}

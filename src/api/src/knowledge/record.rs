//! Race records, horse profiles and the snapshot document.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::index::PartitionMethod;

/// Most recent races kept per horse
pub const MAX_RACE_HISTORY: usize = 50;

/// Track surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Turf,
    Dirt,
    Obstacle,
}

/// Going reported for a race (良 / 稍重 / 重 / 不良).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCondition {
    Firm,
    Good,
    Yielding,
    Heavy,
}

impl TrackCondition {
    pub const ALL: [TrackCondition; 4] = [
        TrackCondition::Firm,
        TrackCondition::Good,
        TrackCondition::Yielding,
        TrackCondition::Heavy,
    ];

    /// Parse a Japanese going label or its English alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "良" => Some(TrackCondition::Firm),
            "稍重" | "稍" => Some(TrackCondition::Good),
            "重" => Some(TrackCondition::Yielding),
            "不良" | "不" => Some(TrackCondition::Heavy),
            other => match other.to_lowercase().as_str() {
                "firm" => Some(TrackCondition::Firm),
                "good" => Some(TrackCondition::Good),
                "yielding" => Some(TrackCondition::Yielding),
                "heavy" | "soft" => Some(TrackCondition::Heavy),
                _ => None,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackCondition::Firm => "良",
            TrackCondition::Good => "稍重",
            TrackCondition::Yielding => "重",
            TrackCondition::Heavy => "不良",
        }
    }
}

/// Distance category used for aptitude aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceBucket {
    Sprint,       // up to 1400m
    Mile,         // 1401-1800m
    Intermediate, // 1801-2200m
    Long,         // over 2200m
}

impl DistanceBucket {
    pub fn from_distance(distance: u32) -> Self {
        match distance {
            0..=1400 => DistanceBucket::Sprint,
            1401..=1800 => DistanceBucket::Mile,
            1801..=2200 => DistanceBucket::Intermediate,
            _ => DistanceBucket::Long,
        }
    }
}

/// One historical race entry for a horse. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Metres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface: Option<Surface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub racecourse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_condition: Option<TrackCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_position: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_size: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u8>,
    /// Assigned weight in kg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_carried: Option<f64>,
    /// Body weight in kg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horse_weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_change: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jockey_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trainer_id: Option<String>,
    /// Positions at each corner passage, in order (0-4 entries)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corner_positions: Vec<u8>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<f64>,
}

impl RaceRecord {
    pub fn is_win(&self) -> bool {
        self.finish_position == Some(1)
    }

    pub fn is_place(&self) -> bool {
        matches!(self.finish_position, Some(p) if (1..=3).contains(&p))
    }
}

/// Basic horse information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_race_date: Option<NaiveDate>,
}

/// Aggregates precomputed at build time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorseStats {
    pub total_races: u32,
    pub wins: u32,
    pub places: u32,
    #[serde(default)]
    pub distance_positions: BTreeMap<DistanceBucket, Vec<u8>>,
    #[serde(default)]
    pub jockey_positions: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub trainer_positions: BTreeMap<String, Vec<u8>>,
}

impl HorseStats {
    fn from_races(races: &[RaceRecord]) -> Self {
        let mut stats = HorseStats {
            total_races: races.len() as u32,
            ..Default::default()
        };

        for race in races {
            if race.is_win() {
                stats.wins += 1;
            }
            if race.is_place() {
                stats.places += 1;
            }

            let Some(position) = race.finish_position else {
                continue;
            };
            if let Some(distance) = race.distance {
                stats
                    .distance_positions
                    .entry(DistanceBucket::from_distance(distance))
                    .or_default()
                    .push(position);
            }
            if let Some(jockey) = &race.jockey_id {
                stats
                    .jockey_positions
                    .entry(jockey.clone())
                    .or_default()
                    .push(position);
            }
            if let Some(trainer) = &race.trainer_id {
                stats
                    .trainer_positions
                    .entry(trainer.clone())
                    .or_default()
                    .push(position);
            }
        }

        stats
    }
}

/// Aggregated historical record set for one horse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorseProfile {
    #[serde(default)]
    pub basic: BasicInfo,
    /// Most recent first, at most [`MAX_RACE_HISTORY`] entries
    #[serde(default)]
    pub races: Vec<RaceRecord>,
    #[serde(default)]
    pub stats: HorseStats,
}

impl HorseProfile {
    /// Build a profile from raw race rows: newest first, capped, aggregated.
    pub fn from_races(mut basic: BasicInfo, mut races: Vec<RaceRecord>) -> Self {
        // Undated rows sort after dated ones
        races.sort_by(|a, b| match (a.date, b.date) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        races.truncate(MAX_RACE_HISTORY);

        if basic.last_race_date.is_none() {
            basic.last_race_date = races.first().and_then(|r| r.date);
        }

        let stats = HorseStats::from_races(&races);
        Self {
            basic,
            races,
            stats,
        }
    }

    pub fn has_history(&self) -> bool {
        !self.races.is_empty()
    }
}

/// Snapshot metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: String,
    pub built_at: DateTime<Utc>,
    pub total_horses: usize,
    /// `None` for a monolithic snapshot
    #[serde(default)]
    pub partitioning: Option<PartitionMethod>,
}

/// Full knowledge snapshot: metadata plus the horse map keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub horses: BTreeMap<String, HorseProfile>,
}

impl Snapshot {
    /// Assemble a snapshot, dropping horses without any usable race.
    pub fn from_profiles(version: impl Into<String>, profiles: BTreeMap<String, HorseProfile>) -> Self {
        let before = profiles.len();
        let horses: BTreeMap<String, HorseProfile> = profiles
            .into_iter()
            .filter(|(_, profile)| profile.has_history())
            .collect();

        if horses.len() < before {
            info!(
                "Excluded {} horses without race history",
                before - horses.len()
            );
        }

        Self {
            metadata: SnapshotMetadata {
                version: version.into(),
                built_at: Utc::now(),
                total_horses: horses.len(),
                partitioning: None,
            },
            horses,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn race(date: &str, position: u8) -> RaceRecord {
        RaceRecord {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            distance: Some(1600),
            surface: Some(Surface::Turf),
            racecourse: Some("東京".to_string()),
            track_condition: Some(TrackCondition::Firm),
            finish_position: Some(position),
            field_size: Some(16),
            odds: Some(4.5),
            popularity: Some(2),
            weight_carried: Some(56.0),
            horse_weight: Some(480),
            weight_change: Some(2),
            jockey_id: Some("01167".to_string()),
            trainer_id: Some("01061".to_string()),
            corner_positions: vec![6, 5, 4, 3],
            finish_time: Some(94.8),
        }
    }

    /// Five races, two wins.
    pub fn profile_a() -> HorseProfile {
        HorseProfile::from_races(
            BasicInfo {
                sex: Some("牡".to_string()),
                age: Some(4),
                last_race_date: None,
            },
            vec![
                race("2024-05-05", 1),
                race("2024-03-10", 3),
                race("2024-01-14", 1),
                race("2023-11-26", 5),
                race("2023-10-08", 2),
            ],
        )
    }

    pub fn profile_with_positions(positions: &[u8]) -> HorseProfile {
        let races = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    - chrono::Duration::days(30 * i as i64);
                RaceRecord {
                    date: Some(date),
                    ..race("2024-01-01", p)
                }
            })
            .collect();
        HorseProfile::from_races(BasicInfo::default(), races)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_from_races_orders_newest_first_and_aggregates() {
        let profile = HorseProfile::from_races(
            BasicInfo::default(),
            vec![race("2023-01-01", 4), race("2024-01-01", 1), race("2023-06-01", 2)],
        );

        let dates: Vec<_> = profile.races.iter().map(|r| r.date.unwrap().to_string()).collect();
        assert_eq!(dates, vec!["2024-01-01", "2023-06-01", "2023-01-01"]);
        assert_eq!(profile.basic.last_race_date, profile.races[0].date);
        assert_eq!(profile.stats.total_races, 3);
        assert_eq!(profile.stats.wins, 1);
        assert_eq!(profile.stats.places, 2);
        assert_eq!(
            profile.stats.distance_positions.get(&DistanceBucket::Mile),
            Some(&vec![1, 2, 4])
        );
        assert_eq!(profile.stats.jockey_positions["01167"].len(), 3);
    }

    #[test]
    fn test_history_is_capped() {
        let positions: Vec<u8> = (0..80).map(|i| (i % 10 + 1) as u8).collect();
        let profile = profile_with_positions(&positions);
        assert_eq!(profile.races.len(), MAX_RACE_HISTORY);
        assert_eq!(profile.stats.total_races, MAX_RACE_HISTORY as u32);
    }

    #[test]
    fn test_absent_fields_are_omitted_not_zeroed() {
        let record = RaceRecord {
            finish_position: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"finish_position":3}"#);

        let parsed: RaceRecord = serde_json::from_str("{}").unwrap();
        assert!(parsed.finish_position.is_none());
        assert!(parsed.corner_positions.is_empty());
    }

    #[test]
    fn test_snapshot_excludes_horses_without_history() {
        let mut profiles = BTreeMap::new();
        profiles.insert("A".to_string(), profile_a());
        profiles.insert("B".to_string(), HorseProfile::default());

        let snapshot = Snapshot::from_profiles("2024.05", profiles);
        assert_eq!(snapshot.metadata.total_horses, 1);
        assert!(snapshot.horses.contains_key("A"));
        assert!(!snapshot.horses.contains_key("B"));
    }

    #[test]
    fn test_track_condition_parse() {
        assert_eq!(TrackCondition::parse("良"), Some(TrackCondition::Firm));
        assert_eq!(TrackCondition::parse("稍重"), Some(TrackCondition::Good));
        assert_eq!(TrackCondition::parse("重"), Some(TrackCondition::Yielding));
        assert_eq!(TrackCondition::parse("不良"), Some(TrackCondition::Heavy));
        assert_eq!(TrackCondition::parse("Heavy"), Some(TrackCondition::Heavy));
        assert_eq!(TrackCondition::parse("mud"), None);
    }

    #[test]
    fn test_distance_bucket() {
        assert_eq!(DistanceBucket::from_distance(1200), DistanceBucket::Sprint);
        assert_eq!(DistanceBucket::from_distance(1600), DistanceBucket::Mile);
        assert_eq!(DistanceBucket::from_distance(2000), DistanceBucket::Intermediate);
        assert_eq!(DistanceBucket::from_distance(2500), DistanceBucket::Long);
    }
}

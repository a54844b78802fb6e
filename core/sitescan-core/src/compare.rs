//! Cross-location comparison of stored series.
//!
//! Sentinel readings mean "not heard" and are excluded from every statistic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SurveyError};
use crate::types::{ApKey, LocationKey, Reading, Series, SENTINEL, UNKNOWN_NAME};

pub const MIN_COMPARE_LOCATIONS: usize = 2;

/// Range of the real (non-sentinel) readings of one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub min: Reading,
    pub max: Reading,
    pub samples: usize,
}

impl SeriesStats {
    /// `min` and `max` are `0` when the series holds only sentinels.
    pub fn of(series: &[Reading]) -> Self {
        real_readings(series).fold(Self::default(), |stats, reading| {
            if stats.samples == 0 {
                Self {
                    min: reading,
                    max: reading,
                    samples: 1,
                }
            } else {
                Self {
                    min: stats.min.min(reading),
                    max: stats.max.max(reading),
                    samples: stats.samples + 1,
                }
            }
        })
    }
}

/// Series for one AP at one location, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSeries {
    pub display_name: String,
    pub series: Series,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStat {
    pub location: LocationKey,
    pub stats: SeriesStats,
    pub series: Series,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApComparison {
    pub ap: ApKey,
    pub display_name: String,
    pub locations: Vec<LocationStat>,
    pub overall: SeriesStats,
}

/// Compares the APs heard at every one of the given locations.
///
/// Output is sorted by AP key; locations keep key order.
pub fn compare_locations(
    stored: &BTreeMap<LocationKey, BTreeMap<ApKey, StoredSeries>>,
) -> Result<Vec<ApComparison>> {
    if stored.len() < MIN_COMPARE_LOCATIONS {
        return Err(SurveyError::NotEnoughLocations {
            required: MIN_COMPARE_LOCATIONS,
            found: stored.len(),
        });
    }

    let mut present: BTreeMap<&ApKey, usize> = BTreeMap::new();
    for per_location in stored.values() {
        for ap in per_location.keys() {
            *present.entry(ap).or_default() += 1;
        }
    }

    let comparisons = present
        .into_iter()
        .filter(|(_, count)| *count == stored.len())
        .map(|(ap, _)| {
            let locations = stored
                .iter()
                .filter_map(|(location, per_location)| {
                    per_location.get(ap).map(|entry| LocationStat {
                        location: *location,
                        stats: SeriesStats::of(&entry.series),
                        series: entry.series.clone(),
                    })
                })
                .collect::<Vec<_>>();

            let all_readings = stored
                .values()
                .filter_map(|per_location| per_location.get(ap))
                .flat_map(|entry| entry.series.iter().copied())
                .collect::<Vec<_>>();

            ApComparison {
                ap: ap.clone(),
                display_name: first_known_name(stored, ap),
                locations,
                overall: SeriesStats::of(&all_readings),
            }
        })
        .collect();

    Ok(comparisons)
}

fn first_known_name(
    stored: &BTreeMap<LocationKey, BTreeMap<ApKey, StoredSeries>>,
    ap: &ApKey,
) -> String {
    stored
        .values()
        .filter_map(|per_location| per_location.get(ap))
        .map(|entry| entry.display_name.as_str())
        .find(|name| !name.is_empty() && *name != UNKNOWN_NAME)
        .unwrap_or(UNKNOWN_NAME)
        .to_string()
}

fn real_readings(series: &[Reading]) -> impl Iterator<Item = Reading> + '_ {
    series.iter().copied().filter(|reading| *reading != SENTINEL)
}

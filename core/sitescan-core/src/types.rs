//! Shared data types for scan sessions.
//!
//! These are deliberately plain: keys are the SQLite row id of a location and
//! the hardware address of an access point, readings are raw dBm integers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies a sampling target (row id of a stored location).
pub type LocationKey = i64;

/// Identifies one observed access point (BSSID).
pub type ApKey = String;

/// Signal level in dBm. Out-of-range values are kept as-is.
pub type Reading = i32;

/// Round-aligned readings for one access point.
pub type Series = Vec<Reading>;

/// Recorded for an access point that was silent in a round.
pub const SENTINEL: Reading = 0;

/// Display name used when a scan never resolved an SSID for an AP.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Series for every AP seen at one location, keyed by BSSID.
pub type LocationSeries = BTreeMap<ApKey, Series>;

/// One reading returned by a [`SampleSource`](crate::SampleSource) poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApReading {
    pub ap: ApKey,
    pub level: Reading,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ApReading {
    pub fn new(ap: impl Into<ApKey>, level: Reading) -> Self {
        Self {
            ap: ap.into(),
            level,
            display_name: None,
        }
    }

    pub fn named(ap: impl Into<ApKey>, level: Reading, display_name: impl Into<String>) -> Self {
        Self {
            ap: ap.into(),
            level,
            display_name: Some(display_name.into()),
        }
    }

    /// The display name if it carries anything other than whitespace.
    pub fn resolved_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Live, observable state of one location's session.
///
/// Published as a whole; `rounds_completed` always matches the length of
/// every series in `series` (capped at the session length).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub rounds_completed: usize,
    pub series: LocationSeries,
}

/// One finished per-AP series, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub location: LocationKey,
    pub ap: ApKey,
    pub display_name: String,
    pub series: Series,
    pub recorded_at: DateTime<Utc>,
}

/// Pads `series` with sentinels up to `len`. Longer series are truncated.
pub fn pad_series(series: &[Reading], len: usize) -> Series {
    let mut padded: Series = series.iter().copied().take(len).collect();
    padded.resize(len, SENTINEL);
    padded
}

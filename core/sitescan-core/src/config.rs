//! Session timing configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, SurveyError};

pub const DEFAULT_ROUNDS: usize = 100;
pub const DEFAULT_DWELL_MS: u64 = 3000;

/// `rounds` bounds both the number of rounds per session and the maximum
/// series length. Total session time is roughly `rounds * dwell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            dwell_ms: DEFAULT_DWELL_MS,
        }
    }
}

impl ScanConfig {
    pub fn new(rounds: usize, dwell: Duration) -> Self {
        Self {
            rounds,
            dwell_ms: dwell.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(SurveyError::InvalidConfig(
                "rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_rounds() -> usize {
    DEFAULT_ROUNDS
}

fn default_dwell_ms() -> u64 {
    DEFAULT_DWELL_MS
}

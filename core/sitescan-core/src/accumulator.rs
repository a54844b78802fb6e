//! Per-location buffer of round-aligned series.
//!
//! Position `i` of every series means "round `i`", whether or not the AP was
//! heard in that round. Silent rounds hold [`SENTINEL`], so all series for a
//! location share one length after each [`SeriesAccumulator::record`].

use crate::types::{ApReading, LocationSeries, SENTINEL};

#[derive(Debug, Clone)]
pub struct SeriesAccumulator {
    capacity: usize,
    series: LocationSeries,
}

impl SeriesAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            series: LocationSeries::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.series.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Records round `round` (0-indexed).
    ///
    /// New APs are back-filled with sentinels for rounds `0..round`; APs
    /// absent from `readings` get a sentinel. If an AP appears twice in one
    /// round only the first reading counts. Rounds at or past capacity are
    /// no-ops.
    pub fn record(&mut self, round: usize, readings: &[ApReading]) {
        if round >= self.capacity {
            return;
        }
        let target = round + 1;

        for reading in readings {
            let series = self
                .series
                .entry(reading.ap.clone())
                .or_insert_with(|| vec![SENTINEL; target.saturating_sub(1)]);
            if series.len() < target.saturating_sub(1) {
                series.resize(target - 1, SENTINEL);
            }
            if series.len() < target {
                series.push(reading.level);
            }
        }

        for series in self.series.values_mut() {
            if series.len() < target {
                series.resize(target, SENTINEL);
            }
        }
    }

    /// Copy of the current series. The live buffer is never handed out.
    pub fn snapshot(&self) -> LocationSeries {
        self.series.clone()
    }
}

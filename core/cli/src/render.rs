//! Plain-text rendering of daemon responses.

use sitescan_core::{ActiveSession, ApComparison, LiveView, Reading, SeriesStats, SENTINEL};
use sitescan_daemon_protocol::{LocationInfo, ScanInfo};
use std::fmt::Write;

const TAIL_LEN: usize = 8;

pub fn locations(locations: &[LocationInfo]) -> String {
    if locations.is_empty() {
        return "No locations.\n".to_string();
    }
    let mut out = String::new();
    for location in locations {
        let marker = if location.scanning { "  [scanning]" } else { "" };
        let _ = writeln!(out, "{:>5}  {}{}", location.id, location.name, marker);
    }
    out
}

pub fn active(sessions: &[ActiveSession]) -> String {
    if sessions.is_empty() {
        return "No scans running.\n".to_string();
    }
    let mut out = String::new();
    for session in sessions {
        let _ = writeln!(
            out,
            "{:>5}  round {:>4}  {:>3} APs  since {}",
            session.location,
            session.rounds_completed,
            session.access_points,
            session.started_at.format("%H:%M:%S")
        );
    }
    out
}

pub fn live(view: &LiveView) -> String {
    if !view.active {
        return format!("Location {} is not scanning.\n", view.location);
    }
    let mut out = format!(
        "Location {}: {} rounds, {} APs\n",
        view.location,
        view.rounds_completed,
        view.access_points.len()
    );
    for ap in &view.access_points {
        let _ = writeln!(
            out,
            "  {:<17}  {:<24}  {}",
            ap.ap,
            ap.display_name,
            tail(&ap.series)
        );
    }
    out
}

pub fn comparison(aps: &[ApComparison]) -> String {
    if aps.is_empty() {
        return "No access points are common to all locations.\n".to_string();
    }
    let mut out = String::new();
    for ap in aps {
        let _ = writeln!(
            out,
            "{} ({})  overall {}",
            ap.ap,
            ap.display_name,
            range(ap.overall.samples, ap.overall.min, ap.overall.max)
        );
        for location in &ap.locations {
            let _ = writeln!(
                out,
                "  {:>5}  {}",
                location.location,
                range(location.stats.samples, location.stats.min, location.stats.max)
            );
        }
    }
    out
}

pub fn scans(scans: &[ScanInfo]) -> String {
    if scans.is_empty() {
        return "No stored series.\n".to_string();
    }
    let mut out = String::new();
    for scan in scans {
        let stats = SeriesStats::of(&scan.series);
        let _ = writeln!(
            out,
            "{}  {:<17}  {:<24}  {}",
            scan.recorded_at,
            scan.bssid,
            scan.ssid,
            range(stats.samples, stats.min, stats.max)
        );
    }
    out
}

fn range(samples: usize, min: Reading, max: Reading) -> String {
    if samples == 0 {
        return "no readings".to_string();
    }
    format!("{}..{} dBm ({} samples)", min, max, samples)
}

/// Last few readings, sentinels shown as `-`.
fn tail(series: &[Reading]) -> String {
    let start = series.len().saturating_sub(TAIL_LEN);
    series[start..]
        .iter()
        .map(|reading| {
            if *reading == SENTINEL {
                "-".to_string()
            } else {
                reading.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

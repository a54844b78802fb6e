//! Sample source backed by NetworkManager's `nmcli`.
//!
//! Terse output escapes `:` inside fields as `\:`, which matters because
//! BSSIDs are colon-separated. Signal comes back as 0-100 quality and is
//! mapped to dBm as `quality / 2 - 100`.

use sitescan_core::{ApReading, Reading, SampleSource};
use std::process::Command;

use crate::config::SourceConfig;

#[derive(Debug, Clone)]
pub struct NmcliSource {
    command: String,
    interface: Option<String>,
    rescan: bool,
}

impl NmcliSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            command: config.command.clone(),
            interface: config
                .interface
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            rescan: config.rescan,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "-f".to_string(),
            "BSSID,SSID,SIGNAL".to_string(),
            "device".to_string(),
            "wifi".to_string(),
            "list".to_string(),
        ];
        if let Some(interface) = &self.interface {
            args.push("ifname".to_string());
            args.push(interface.clone());
        }
        args.push("--rescan".to_string());
        args.push(if self.rescan { "yes" } else { "no" }.to_string());
        args
    }
}

impl SampleSource for NmcliSource {
    fn poll(&self) -> Result<Vec<ApReading>, String> {
        let output = Command::new(&self.command)
            .args(self.args())
            .output()
            .map_err(|err| format!("Failed to run {}: {}", self.command, err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            ));
        }
        Ok(parse_wifi_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn parse_wifi_list(output: &str) -> Vec<ApReading> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [bssid, ssid, signal] = fields.as_slice() else {
                return None;
            };
            let bssid = bssid.trim();
            if bssid.is_empty() {
                return None;
            }
            let quality = signal.trim().parse::<Reading>().ok()?;
            let ssid = ssid.trim();
            Some(ApReading {
                ap: bssid.to_ascii_lowercase(),
                level: quality_to_dbm(quality),
                display_name: (!ssid.is_empty()).then(|| ssid.to_string()),
            })
        })
        .collect()
}

pub fn quality_to_dbm(quality: Reading) -> Reading {
    quality.clamp(0, 100) / 2 - 100
}

fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

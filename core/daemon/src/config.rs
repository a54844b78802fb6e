//! Daemon configuration loaded from `~/.sitescan/config.toml`.

use serde::Deserialize;
use sitescan_core::ScanConfig;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub scan: ScanConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub command: String,
    pub interface: Option<String>,
    pub rescan: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            command: "nmcli".to_string(),
            interface: None,
            rescan: true,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".sitescan").join(CONFIG_FILE))
}

/// Missing file means defaults. A zero `rounds` is replaced by the default.
pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    let mut config = toml::from_str::<DaemonConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse config {}: {}",
            config_path.display(),
            err
        )
    })?;

    if let Err(err) = config.scan.validate() {
        tracing::warn!(
            error = %err,
            path = %config_path.display(),
            "Invalid scan config; using default rounds"
        );
        config.scan.rounds = ScanConfig::default().rounds;
    }
    if config.source.command.trim().is_empty() {
        tracing::warn!("Empty source command; using nmcli");
        config.source.command = SourceConfig::default().command;
    }

    Ok(config)
}

//! sitescan: command-line client for the sitescan daemon.
//!
//! Every subcommand is one (or, for `watch`, a series of) socket requests.
//! The daemon owns all state; this binary only formats what it returns.
//!
//! ## Subcommands
//!
//! - `locations add|list|delete`: manage sampling locations
//! - `start`, `cancel`: control a location's scan session
//! - `status`, `watch`: inspect running sessions
//! - `compare`, `scans`, `store-live`, `reset`: work with stored series

mod client;
mod render;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sitescan_core::{ActiveSession, ApComparison, LiveView};
use sitescan_daemon_protocol::{LocationInfo, Method, ScanInfo};
use std::env;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use client::{ClientError, DaemonClient};

#[derive(Parser)]
#[command(name = "sitescan")]
#[command(about = "Wi-Fi site survey client")]
#[command(version)]
struct Cli {
    /// Print raw JSON response data
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sampling locations
    Locations {
        #[command(subcommand)]
        command: LocationCommands,
    },

    /// Start a scan session for a location
    Start {
        #[arg(value_name = "ID")]
        location_id: i64,
    },

    /// Cancel a running scan session (nothing is stored)
    Cancel {
        #[arg(value_name = "ID")]
        location_id: i64,
    },

    /// Show running sessions, or the live series of one location
    Status {
        #[arg(value_name = "ID")]
        location_id: Option<i64>,
    },

    /// Follow a location's live state until its session ends
    Watch {
        #[arg(value_name = "ID")]
        location_id: i64,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Compare the latest stored series of two or more locations
    Compare {
        #[arg(value_name = "ID", num_args = 2.., required = true)]
        location_ids: Vec<i64>,
    },

    /// List every stored series of a location, newest first
    Scans {
        #[arg(value_name = "ID")]
        location_id: i64,
    },

    /// Store the live series of every running session now
    StoreLive,

    /// Drop orphaned series and zero the rest
    Reset,

    /// Check that the daemon is up
    Health,
}

#[derive(Subcommand)]
enum LocationCommands {
    /// Add a named location
    Add {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List locations
    List,

    /// Delete a location, cancelling its session if one is running
    Delete {
        #[arg(value_name = "ID")]
        location_id: i64,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let client = match DaemonClient::from_env() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("sitescan: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&client, cli.command, cli.json) {
        tracing::debug!(error = %err, socket = %client.socket().display(), "Command failed");
        eprintln!("sitescan: {}", err);
        std::process::exit(1);
    }
}

fn init_logging() {
    let debug_enabled = env::var("SITESCAN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(client: &DaemonClient, command: Commands, json: bool) -> Result<(), ClientError> {
    match command {
        Commands::Locations { command } => match command {
            LocationCommands::Add { name } => {
                let data = client.call(
                    Method::AddLocation,
                    Some(serde_json::json!({ "name": name })),
                )?;
                print_or(json, &data, |data| {
                    let location: LocationInfo = decode(data)?;
                    Ok(format!("Added location {} ({})\n", location.id, location.name))
                })
            }
            LocationCommands::List => {
                let data = client.call(Method::ListLocations, None)?;
                print_or(json, &data, |data| {
                    Ok(render::locations(&decode::<Vec<LocationInfo>>(data)?))
                })
            }
            LocationCommands::Delete { location_id } => {
                let data = client.call(Method::DeleteLocation, Some(location(location_id)))?;
                print_or(json, &data, |data| {
                    Ok(if data["removed"] == true {
                        format!("Deleted location {}\n", location_id)
                    } else {
                        format!("Location {} did not exist\n", location_id)
                    })
                })
            }
        },
        Commands::Start { location_id } => {
            let data = client.call(Method::StartScan, Some(location(location_id)))?;
            print_or(json, &data, |data| {
                Ok(if data["started"] == true {
                    format!("Scanning location {}\n", location_id)
                } else {
                    format!("Location {} is already scanning\n", location_id)
                })
            })
        }
        Commands::Cancel { location_id } => {
            let data = client.call(Method::CancelScan, Some(location(location_id)))?;
            print_or(json, &data, |data| {
                Ok(if data["cancelled"] == true {
                    format!("Cancelled scan for location {}\n", location_id)
                } else {
                    format!("No running scan to cancel for location {}\n", location_id)
                })
            })
        }
        Commands::Status {
            location_id: Some(location_id),
        } => {
            let data = client.call(Method::GetLiveState, Some(location(location_id)))?;
            print_or(json, &data, |data| Ok(render::live(&decode::<LiveView>(data)?)))
        }
        Commands::Status { location_id: None } => {
            let data = client.call(Method::GetActive, None)?;
            print_or(json, &data, |data| {
                Ok(render::active(&decode::<Vec<ActiveSession>>(data)?))
            })
        }
        Commands::Watch {
            location_id,
            interval_ms,
        } => watch(client, location_id, Duration::from_millis(interval_ms.max(50)), json),
        Commands::Compare { location_ids } => {
            let data = client.call(
                Method::Compare,
                Some(serde_json::json!({ "location_ids": location_ids })),
            )?;
            print_or(json, &data, |data| {
                Ok(render::comparison(&decode::<Vec<ApComparison>>(data)?))
            })
        }
        Commands::Scans { location_id } => {
            let data = client.call(Method::ListScans, Some(location(location_id)))?;
            print_or(json, &data, |data| {
                Ok(render::scans(&decode::<Vec<ScanInfo>>(data)?))
            })
        }
        Commands::StoreLive => {
            let data = client.call(Method::StoreLive, None)?;
            print_or(json, &data, |data| {
                Ok(format!(
                    "Stored {} series from {} locations\n",
                    data["records"], data["locations"]
                ))
            })
        }
        Commands::Reset => {
            let data = client.call(Method::ResetStored, None)?;
            print_or(json, &data, |data| {
                Ok(format!(
                    "Deleted {} orphaned series, zeroed {}\n",
                    data["orphans_deleted"], data["series_zeroed"]
                ))
            })
        }
        Commands::Health => {
            let data = client.call(Method::GetHealth, None)?;
            print_or(json, &data, |data| {
                Ok(format!(
                    "Daemon {} (pid {}, version {}, {} active)\n",
                    data["status"].as_str().unwrap_or("unknown"),
                    data["pid"],
                    data["version"].as_str().unwrap_or("unknown"),
                    data["active_sessions"]
                ))
            })
        }
    }
}

fn watch(
    client: &DaemonClient,
    location_id: i64,
    interval: Duration,
    json: bool,
) -> Result<(), ClientError> {
    let mut last_round = None;
    loop {
        let data = client.call(Method::GetLiveState, Some(location(location_id)))?;
        let view: LiveView = decode(&data)?;
        if !view.active {
            if last_round.is_none() {
                print_or(json, &data, |_| Ok(render::live(&view)))?;
            } else {
                println!("Location {} finished scanning", location_id);
            }
            return Ok(());
        }
        if last_round != Some(view.rounds_completed) {
            last_round = Some(view.rounds_completed);
            print_or(json, &data, |_| Ok(render::live(&view)))?;
        }
        thread::sleep(interval);
    }
}

fn location(location_id: i64) -> Value {
    serde_json::json!({ "location_id": location_id })
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T, ClientError> {
    serde_json::from_value(data.clone())
        .map_err(|err| ClientError::InvalidResponse(format!("unexpected data: {}", err)))
}

fn print_or(
    json: bool,
    data: &Value,
    text: impl FnOnce(&Value) -> Result<String, ClientError>,
) -> Result<(), ClientError> {
    if json {
        println!("{}", data);
    } else {
        print!("{}", text(data)?);
    }
    Ok(())
}

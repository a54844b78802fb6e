//! Sitescan daemon entrypoint.
//!
//! A small, single-writer service that owns scan sessions and the survey
//! store: a socket listener, strict request validation, one thread per
//! running scan session, and a SQLite store for finished series.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde::Serialize;
use sitescan_daemon_protocol::{
    parse_add_location, parse_compare, parse_location, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod config;
mod db;
mod source;
mod state;

use db::Db;
use state::{SharedState, StartResult};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Sitescan daemon started");

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let daemon_config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            config::DaemonConfig::default()
        }
    };
    info!(
        rounds = daemon_config.scan.rounds,
        dwell_ms = daemon_config.scan.dwell_ms,
        command = %daemon_config.source.command,
        interface = ?daemon_config.source.interface,
        "Scan config loaded"
    );

    let shared_state = Arc::new(SharedState::new(db, daemon_config));
    shared_state.spawn_outcome_logger();

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("SITESCAN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn sitescan_home() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".sitescan"))
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("SITESCAN_SOCKET") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(sitescan_home()?.join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    Ok(sitescan_home()?.join("daemon").join("survey.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    match request.method {
        Method::GetHealth => {
            let config = state.config();
            let data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "started_at": state.started_at(),
                "active_sessions": state.active_snapshot().len(),
                "rounds": config.scan.rounds,
                "dwell_ms": config.scan.dwell_ms,
            });
            Response::ok(id, data)
        }
        Method::AddLocation => {
            let params = match parse_add_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, "location_error", state.add_location(&params.name))
        }
        Method::ListLocations => respond(id, "location_error", state.locations_snapshot()),
        Method::DeleteLocation => {
            let params = match parse_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let location_id = params.location_id;
            respond(
                id,
                "location_error",
                state.delete_location(location_id).map(|removed| {
                    serde_json::json!({ "location_id": location_id, "removed": removed })
                }),
            )
        }
        Method::StartScan => {
            let params = match parse_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let location_id = params.location_id;
            match state.start_scan(location_id) {
                Ok(StartResult::UnknownLocation) => Response::error(
                    id,
                    "unknown_location",
                    format!("location {} does not exist", location_id),
                ),
                Ok(result) => {
                    info!(location = location_id, result = ?result, "Start scan handled");
                    Response::ok(
                        id,
                        serde_json::json!({
                            "location_id": location_id,
                            "started": result == StartResult::Started,
                        }),
                    )
                }
                Err(err) => Response::error(
                    id,
                    "start_error",
                    format!("Failed to start scan: {}", err),
                ),
            }
        }
        Method::CancelScan => {
            let params = match parse_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let cancelled = state.cancel_scan(params.location_id);
            info!(location = params.location_id, cancelled, "Cancel scan handled");
            Response::ok(
                id,
                serde_json::json!({ "location_id": params.location_id, "cancelled": cancelled }),
            )
        }
        Method::GetActive => respond(id, "active_error", Ok(state.active_snapshot())),
        Method::GetLiveState => {
            let params = match parse_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, "live_state_error", Ok(state.live_view(params.location_id)))
        }
        Method::Compare => {
            let params = match parse_compare(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, "compare_error", state.compare(&params.location_ids))
        }
        Method::ListScans => {
            let params = match parse_location(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, "scans_error", state.list_scans(params.location_id))
        }
        Method::StoreLive => respond(id, "store_error", state.store_live()),
        Method::ResetStored => respond(id, "reset_error", state.reset_stored()),
    }
}

fn respond<T: Serialize>(id: Option<String>, code: &str, result: Result<T, String>) -> Response {
    match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => {
            warn!(code, error = %err, "Request failed");
            Response::error(id, code, err)
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

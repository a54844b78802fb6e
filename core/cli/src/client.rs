//! Client for the sitescan daemon socket.
//!
//! One request per connection, newline-delimited JSON both ways.

use serde_json::Value;
use sitescan_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SOCKET_ENV: &str = "SITESCAN_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 10_000;
const WRITE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    NoHome,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to talk to daemon: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Invalid daemon response: {0}")]
    InvalidResponse(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ClientError::NoHome)?;
    Ok(home.join(".sitescan").join(SOCKET_NAME))
}

pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Ok(Self::new(socket_path()?))
    }

    /// Sends one request and returns its `data`, turning daemon errors into `Err`.
    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        let response = self.send(Request::new(method, params))?;
        if response.ok {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        Err(match response.error {
            Some(error) => ClientError::Daemon {
                code: error.code,
                message: error.message,
            },
            None => ClientError::InvalidResponse("error response without details".to_string()),
        })
    }

    pub fn send(&self, request: Request) -> Result<Response, ClientError> {
        let mut stream =
            UnixStream::connect(&self.socket).map_err(|source| ClientError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        tracing::debug!(
            method = ?request.method,
            socket = %self.socket.display(),
            "Sending request"
        );
        serde_json::to_writer(&mut stream, &request).map_err(ClientError::Encode)?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        read_response(&mut stream)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 16 {
                    return Err(ClientError::InvalidResponse(
                        "response exceeded maximum size".to_string(),
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
                return Err(ClientError::Timeout);
            }
            Err(err) => return Err(ClientError::Io(err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::InvalidResponse("response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::InvalidResponse(format!("not valid JSON: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn serve_once(listener: UnixListener, reply: &'static str) -> thread::JoinHandle<Request> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buffer.contains(&b'\n') {
                let n = stream.read(&mut chunk).expect("read request");
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            let end = buffer.iter().position(|b| *b == b'\n').unwrap_or(buffer.len());
            let request: Request = serde_json::from_slice(&buffer[..end]).expect("parse request");
            stream.write_all(reply.as_bytes()).expect("write reply");
            request
        })
    }

    #[test]
    fn call_returns_data_and_sends_params() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = serve_once(listener, "{\"ok\":true,\"data\":{\"started\":true}}\n");

        let client = DaemonClient::new(socket);
        let data = client
            .call(
                Method::StartScan,
                Some(serde_json::json!({ "location_id": 4 })),
            )
            .expect("call");
        assert_eq!(data["started"], true);

        let request = server.join().expect("server");
        assert_eq!(request.method, Method::StartScan);
        assert_eq!(request.params, Some(serde_json::json!({ "location_id": 4 })));
    }

    #[test]
    fn daemon_errors_keep_their_code() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = serve_once(
            listener,
            "{\"ok\":false,\"error\":{\"code\":\"unknown_location\",\"message\":\"location 9 does not exist\"}}\n",
        );

        let err = DaemonClient::new(socket)
            .call(Method::StartScan, Some(serde_json::json!({ "location_id": 9 })))
            .expect_err("daemon error");
        assert!(
            matches!(&err, ClientError::Daemon { code, .. } if code == "unknown_location"),
            "unexpected error: {err}"
        );
        server.join().expect("server");
    }

    #[test]
    fn missing_socket_is_a_connect_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = DaemonClient::new(dir.path().join("absent.sock"))
            .call(Method::GetHealth, None)
            .expect_err("connect error");
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}

//! Newline-delimited JSON over the daemon's Unix socket, plus the
//! synchronous client helpers the CLI uses.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl DaemonRequest {
    pub fn bare(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            worker: None,
        }
    }

    pub fn for_worker(cmd: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            worker: Some(worker.into()),
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Status with a short retry window, so `colony up && colony status`
/// works while the socket is still coming up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::bare("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_list(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::bare("list"))?)
}

pub fn request_start(home: &Path, worker: &str) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::for_worker("start", worker))?)
}

pub fn request_stop_worker(home: &Path, worker: &str) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::for_worker("stop", worker))?)
}

pub fn request_stop_all(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::bare("stop-all"))?)
}

pub fn request_reconcile(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::bare("reconcile"))?)
}

pub fn request_doctor(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::bare("doctor"))?)
}

pub fn request_shutdown(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::bare("shutdown"))?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_omits_absent_worker() {
        let bare = serde_json::to_string(&DaemonRequest::bare("status")).expect("json");
        assert_eq!(bare, r#"{"cmd":"status"}"#);

        let targeted =
            serde_json::to_string(&DaemonRequest::for_worker("stop", "relay")).expect("json");
        assert_eq!(targeted, r#"{"cmd":"stop","worker":"relay"}"#);
    }

    #[test]
    fn error_response_surfaces_as_protocol_error() {
        let response = DaemonResponse::error("no worker named 'ghost'");
        let err = response_into_data(response).expect_err("must fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_socket_is_daemon_not_running() {
        let dir = tempfile::TempDir::new().expect("dir");
        let err = send_request(dir.path(), &DaemonRequest::bare("status")).expect_err("must fail");
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}

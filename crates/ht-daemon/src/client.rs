//! Client side of the control socket.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::server::IO_TIMEOUT;

const MAX_REPLY_BYTES: u64 = 4096;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket not found at {} - is the daemon running?", .path.display())]
    NotRunning { path: PathBuf },
    #[error("failed to connect to socket: {0}")]
    Connect(#[source] io::Error),
    #[error("error sending command: {0}")]
    Send(#[source] io::Error),
    #[error("error reading acknowledgment: {0}")]
    Receive(#[source] io::Error),
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("unexpected response from daemon: {0}")]
    Rejected(String),
}

/// Sends one command and returns the daemon's reply, trimmed.
///
/// Connect, write and read are each bounded by five seconds.
pub async fn send_command(path: &Path, command: &str) -> Result<String, ClientError> {
    if !path.exists() {
        return Err(ClientError::NotRunning {
            path: path.to_path_buf(),
        });
    }

    let mut stream = timeout(IO_TIMEOUT, UnixStream::connect(path))
        .await
        .map_err(|_| ClientError::Timeout("connecting"))?
        .map_err(ClientError::Connect)?;

    let line = format!("{}\n", command.trim_end());
    timeout(IO_TIMEOUT, async {
        stream.write_all(line.as_bytes()).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| ClientError::Timeout("sending command"))?
    .map_err(ClientError::Send)?;

    let mut reply = String::new();
    timeout(
        IO_TIMEOUT,
        (&mut stream).take(MAX_REPLY_BYTES).read_to_string(&mut reply),
    )
    .await
    .map_err(|_| ClientError::Timeout("waiting for acknowledgment"))?
    .map_err(ClientError::Receive)?;

    Ok(reply.trim().to_string())
}

/// Like [`send_command`], but a reply not starting with `OK` is an error.
pub async fn request(path: &Path, command: &str) -> Result<String, ClientError> {
    let reply = send_command(path, command).await?;
    if reply.starts_with("OK") {
        Ok(reply)
    } else {
        Err(ClientError::Rejected(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use ht_core::DaemonState;
    use tokio::sync::mpsc;

    use crate::server::{CommandHandler, ControlServer};
    use crate::shutdown::Shutdown;

    #[tokio::test]
    async fn missing_socket_reports_daemon_not_running() {
        let temp = tempfile::tempdir().unwrap();
        let err = send_command(&temp.path().join("nope.sock"), "status")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotRunning { .. }));
        assert!(err.to_string().contains("is the daemon running?"));
    }

    #[tokio::test]
    async fn request_rejects_error_replies() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ht.sock");
        let shutdown = Shutdown::new();
        let (tx, _rx) = mpsc::channel(1);
        let handler = CommandHandler::new(Arc::new(DaemonState::new()), tx, shutdown.clone());
        let server = ControlServer::bind(&path, handler).unwrap();
        let task = tokio::spawn(server.run(shutdown.clone()));

        let err = request(&path, "bogus").await.unwrap_err();
        assert_eq!(err.to_string(), "unexpected response from daemon: ERROR: Unknown command");
        assert_eq!(request(&path, "status").await.unwrap(), "OK active");

        shutdown.trigger();
        task.await.unwrap();
    }
}

//! Control socket server.
//!
//! Accepts short-lived connections on a Unix socket, one command each. Every
//! connection gets its own task; reads, writes and queue sends are bounded by
//! [`IO_TIMEOUT`].

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ht_core::{ActivityEvent, DaemonState};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::DaemonError;
use crate::protocol::{Command, IdleAction, MAX_COMMAND_BYTES, Response, parse_command};
use crate::shutdown::Shutdown;

/// Deadline for each read, write and queue send on a connection.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies parsed commands to the daemon.
#[derive(Debug)]
pub struct CommandHandler {
    state: Arc<DaemonState>,
    events: mpsc::Sender<ActivityEvent>,
    shutdown: Shutdown,
}

impl CommandHandler {
    pub const fn new(
        state: Arc<DaemonState>,
        events: mpsc::Sender<ActivityEvent>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            state,
            events,
            shutdown,
        }
    }

    /// Performs the command's side effect and builds the reply.
    pub async fn handle(&self, command: Command, received_at: DateTime<Utc>) -> Response {
        match command {
            Command::Idle { action, at } => {
                if self.state.is_paused() {
                    tracing::debug!(?action, "tracking paused, idle marker ignored");
                    return Response::Ok;
                }
                let timestamp = at.unwrap_or(received_at);
                let event = match action {
                    IdleAction::Start => ActivityEvent::idle_start(timestamp),
                    IdleAction::End => ActivityEvent::idle_end(timestamp),
                };
                match timeout(IO_TIMEOUT, self.events.send(event)).await {
                    Ok(Ok(())) => {
                        tracing::info!(?action, %timestamp, "idle marker received");
                        Response::Ok
                    }
                    Ok(Err(_)) => Response::Error("Event queue closed".to_string()),
                    Err(_) => {
                        tracing::warn!(?action, "event queue full, idle marker dropped");
                        Response::Error("Event queue full".to_string())
                    }
                }
            }
            Command::PauseToggle => {
                let paused = self.state.toggle_pause();
                tracing::info!(paused, "tracking state toggled");
                Response::Ok
            }
            Command::Status => Response::Status {
                paused: self.state.is_paused(),
            },
            Command::Quit => {
                tracing::info!("quit requested over control socket");
                self.shutdown.trigger();
                Response::Ok
            }
        }
    }
}

pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    handler: Arc<CommandHandler>,
    next_conn: AtomicU64,
}

impl ControlServer {
    /// Binds the socket, replacing a stale socket file from a crashed instance.
    ///
    /// The socket is made world read/write.
    pub fn bind(path: &Path, handler: CommandHandler) -> Result<Self, DaemonError> {
        let bind_err = |source| DaemonError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if fs::symlink_metadata(path).is_ok() {
            fs::remove_file(path).map_err(bind_err)?;
            tracing::debug!(path = %path.display(), "removed stale socket");
        }
        let listener = UnixListener::bind(path).map_err(bind_err)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o666)).map_err(bind_err)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            handler: Arc::new(handler),
            next_conn: AtomicU64::new(0),
        })
    }

    /// Accepts connections until `shutdown` fires, then removes the socket file.
    pub async fn run(self, shutdown: Shutdown) {
        tracing::info!(path = %self.path.display(), "control socket listening");
        loop {
            tokio::select! {
                () = shutdown.triggered() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed) + 1;
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            handle_connection(&handler, stream, conn_id).await;
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
                },
            }
        }

        drop(self.listener);
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::debug!(error = %err, "failed to remove socket file");
        }
        tracing::info!("control socket closed");
    }
}

async fn handle_connection(handler: &CommandHandler, mut stream: UnixStream, conn_id: u64) {
    let mut buf = Vec::new();
    {
        let mut reader = BufReader::new(&mut stream).take(MAX_COMMAND_BYTES as u64);
        let read = timeout(IO_TIMEOUT, reader.read_until(b'\n', &mut buf)).await;
        match read {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!(conn_id, error = %err, "failed to read command");
                return;
            }
            // A client that neither terminates the line nor half-closes still
            // gets whatever it sent interpreted.
            Err(_) if !buf.is_empty() => {}
            Err(_) => {
                tracing::warn!(conn_id, "timed out waiting for command");
                return;
            }
        }
    }

    let line = String::from_utf8_lossy(&buf);
    let received_at = Utc::now();
    let response = match parse_command(&line) {
        Ok(command) => handler.handle(command, received_at).await,
        Err(err) => {
            tracing::warn!(conn_id, command = %line.trim(), error = ?err, "rejected command");
            Response::Error(err.to_string())
        }
    };
    tracing::debug!(conn_id, %response, "replying");

    let reply = response.to_string();
    match timeout(IO_TIMEOUT, stream.write_all(reply.as_bytes())).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(conn_id, error = %err, "failed to write reply"),
        Err(_) => tracing::warn!(conn_id, "timed out writing reply"),
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use ht_core::EventKind;

    use crate::client::send_command;

    struct Fixture {
        _temp: tempfile::TempDir,
        path: PathBuf,
        state: Arc<DaemonState>,
        shutdown: Shutdown,
        events: mpsc::Receiver<ActivityEvent>,
        server: tokio::task::JoinHandle<()>,
    }

    fn start() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ht.sock");
        let state = Arc::new(DaemonState::new());
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::channel(8);
        let handler = CommandHandler::new(Arc::clone(&state), tx, shutdown.clone());
        let server = ControlServer::bind(&path, handler).unwrap();
        let server = tokio::spawn(server.run(shutdown.clone()));
        Fixture {
            _temp: temp,
            path,
            state,
            shutdown,
            events: rx,
            server,
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn idle_markers_are_enqueued() {
        let mut fx = start();

        let reply = send_command(&fx.path, "idle start 2024-01-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(reply, "OK");
        send_command(&fx.path, "idle end 2024-01-01T00:10:00Z")
            .await
            .unwrap();

        let start = fx.events.recv().await.unwrap();
        let end = fx.events.recv().await.unwrap();
        assert_eq!(start.kind, EventKind::IdleStart);
        assert!(start.is_idle);
        assert_eq!(end.kind, EventKind::IdleEnd);
        assert_eq!((end.timestamp - start.timestamp).num_seconds(), 600);
        assert_eq!(start.timestamp, ts("2024-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn missing_timestamp_uses_receipt_time() {
        let mut fx = start();
        let before = Utc::now();
        send_command(&fx.path, "idle start").await.unwrap();
        let event = fx.events.recv().await.unwrap();
        assert!(event.timestamp >= before);
        assert!(event.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn unknown_command_has_no_side_effect() {
        let mut fx = start();

        let reply = send_command(&fx.path, "frobnicate").await.unwrap();
        assert_eq!(reply, "ERROR: Unknown command");
        let reply = send_command(&fx.path, "idle").await.unwrap();
        assert_eq!(reply, "ERROR: Invalid command format");
        let reply = send_command(&fx.path, "idle sideways").await.unwrap();
        assert_eq!(reply, "ERROR: Unknown idle action");

        assert!(!fx.state.is_paused());
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn pause_toggle_and_status() {
        let mut fx = start();

        assert_eq!(send_command(&fx.path, "status").await.unwrap(), "OK active");
        assert_eq!(send_command(&fx.path, "pause-toggle").await.unwrap(), "OK");
        assert!(fx.state.is_paused());
        assert_eq!(send_command(&fx.path, "status").await.unwrap(), "OK paused");

        // Idle markers are acknowledged but dropped while paused.
        assert_eq!(send_command(&fx.path, "idle start").await.unwrap(), "OK");
        assert!(fx.events.try_recv().is_err());

        send_command(&fx.path, "pause-toggle").await.unwrap();
        assert!(!fx.state.is_paused());
    }

    #[tokio::test]
    async fn quit_stops_server_and_removes_socket() {
        let fx = start();

        assert_eq!(send_command(&fx.path, "quit").await.unwrap(), "OK");
        assert!(fx.shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(2), fx.server)
            .await
            .expect("server stopped")
            .unwrap();
        assert!(!fx.path.exists());
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ht.sock");
        fs::write(&path, b"stale").unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let handler = CommandHandler::new(Arc::new(DaemonState::new()), tx, Shutdown::new());
        let _server = ControlServer::bind(&path, handler).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
    }

    #[tokio::test]
    async fn closed_queue_reports_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handler = CommandHandler::new(Arc::new(DaemonState::new()), tx, Shutdown::new());
        let response = handler
            .handle(
                Command::Idle {
                    action: IdleAction::End,
                    at: None,
                },
                Utc::now(),
            )
            .await;
        assert_eq!(response, Response::Error("Event queue closed".to_string()));
    }
}

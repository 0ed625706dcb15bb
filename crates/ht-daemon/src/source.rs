//! Sources of raw focus notifications.
//!
//! Hyprland publishes events on a line-oriented socket, one `EVENT>>DATA` per
//! line. Only `activewindow>>NAME,TITLE` matters here; the title is everything
//! after the first comma.

use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use ht_core::ActiveWindow;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;

use crate::DaemonError;

const ACTIVE_WINDOW_PREFIX: &str = "activewindow>>";

/// A stream of raw focus notifications.
pub trait FocusSource: Send {
    /// Next notification, or `None` once the source has ended.
    ///
    /// Must be cancel-safe: the producer races it against other branches.
    fn next_window(&mut self) -> impl Future<Output = io::Result<Option<ActiveWindow>>> + Send;
}

/// Reads Hyprland-format event lines from any byte stream.
///
/// Lines that are not valid UTF-8 are decoded lossily rather than failing the
/// stream.
#[derive(Debug)]
pub struct LineSource<R> {
    reader: BufReader<R>,
    /// Bytes of the current line; survives a cancelled read.
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }
}

impl LineSource<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl LineSource<UnixStream> {
    /// Connects to the running Hyprland instance's event socket.
    pub async fn hyprland() -> Result<Self, DaemonError> {
        let signature = std::env::var("HYPRLAND_INSTANCE_SIGNATURE").map_err(|_| {
            DaemonError::SourceUnavailable(
                "HYPRLAND_INSTANCE_SIGNATURE is not set; is Hyprland running?".to_string(),
            )
        })?;
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        let path = hyprland_socket_path(runtime_dir.as_deref(), &signature);

        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| DaemonError::SourceConnect {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "connected to Hyprland event socket");
        Ok(Self::new(stream))
    }
}

impl<R: AsyncRead + Unpin + Send> FocusSource for LineSource<R> {
    async fn next_window(&mut self) -> io::Result<Option<ActiveWindow>> {
        loop {
            // Partial reads stay in `self.line`, so a cancelled call resumes here.
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }

            let window = {
                let line = String::from_utf8_lossy(&self.line);
                if let Cow::Owned(_) = line {
                    tracing::warn!(line = %line.trim_end(), "focus event line is not valid UTF-8");
                }
                parse_event_line(&line)
            };
            self.line.clear();

            if window.is_some() {
                return Ok(window);
            }
        }
    }
}

/// Extracts the focused window from an `activewindow>>` line.
pub fn parse_event_line(line: &str) -> Option<ActiveWindow> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix(ACTIVE_WINDOW_PREFIX)?;
    let (name, title) = data.split_once(',').unwrap_or((data, ""));
    Some(ActiveWindow::new(name, title))
}

/// `$XDG_RUNTIME_DIR/hypr/<sig>/.socket2.sock` when it exists, otherwise the
/// older `/tmp/hypr/<sig>/.socket2.sock`.
pub fn hyprland_socket_path(runtime_dir: Option<&Path>, signature: &str) -> PathBuf {
    let relative = Path::new("hypr").join(signature).join(".socket2.sock");
    if let Some(dir) = runtime_dir {
        let candidate = dir.join(&relative);
        if candidate.exists() {
            return candidate;
        }
    }
    Path::new("/tmp").join(relative)
}

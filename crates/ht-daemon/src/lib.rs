//! Async runtime for the window activity tracker.
//!
//! Wires the focus source, the [`ht_core::ActivityFilter`], the bounded event
//! queue, the persistence writer and the control socket together:
//!
//! ```text
//! focus source -> producer -> queue -> writer -> BatchSink
//! control socket ----------^   (pause flag shared with the filter)
//! ```

pub mod client;
pub mod daemon;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod source;

use std::path::PathBuf;

use thiserror::Error;

pub use client::{ClientError, send_command};
pub use daemon::{DaemonConfig, SourceKind, run, run_with_source};
pub use pipeline::{Producer, run_writer};
pub use protocol::{Command, IdleAction, ProtocolError, Response, parse_command};
pub use server::{CommandHandler, ControlServer};
pub use shutdown::Shutdown;
pub use source::{FocusSource, LineSource, parse_event_line};

/// Fatal startup errors. Anything after startup is logged and survived.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The control socket could not be bound.
    #[error("failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The compositor event socket could not be located.
    #[error("compositor socket unavailable: {0}")]
    SourceUnavailable(String),
    /// The compositor event socket could not be opened.
    #[error("failed to connect to {path}: {source}")]
    SourceConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

//! Control socket wire protocol.
//!
//! One ASCII command per connection, space separated, terminated by a newline
//! or by the client closing its write half:
//!
//! ```text
//! idle start [RFC3339]    idle end [RFC3339]
//! pause-toggle            status            quit
//! ```
//!
//! The reply is `OK`, `OK paused` / `OK active` for `status`, or `ERROR: <reason>`.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Longest command the server reads.
pub const MAX_COMMAND_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Idle marker. `at` is `None` when the client sent no usable timestamp.
    Idle {
        action: IdleAction,
        at: Option<DateTime<Utc>>,
    },
    PauseToggle,
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Status { paused: bool },
    Error(String),
}

impl Response {
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Status { paused: true } => write!(f, "OK paused"),
            Self::Status { paused: false } => write!(f, "OK active"),
            Self::Error(reason) => write!(f, "ERROR: {reason}"),
        }
    }
}

/// Malformed commands. The `Display` text is the reason sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Empty command")]
    Empty,
    /// `idle` without an action.
    #[error("Invalid command format")]
    MissingIdleAction,
    #[error("Unknown idle action")]
    UnknownIdleAction(String),
    #[error("Unknown command")]
    UnknownCommand(String),
}

/// Parses one command line.
///
/// A malformed idle timestamp is not an error: it is logged and the marker
/// falls back to the receipt time.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim();
    let (verb, rest) = line
        .split_once(' ')
        .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

    match verb {
        "" => Err(ProtocolError::Empty),
        "idle" => {
            let (action, timestamp) = rest
                .split_once(' ')
                .map_or((rest, ""), |(action, ts)| (action, ts.trim()));
            let action = match action {
                "" => return Err(ProtocolError::MissingIdleAction),
                "start" => IdleAction::Start,
                "end" => IdleAction::End,
                other => return Err(ProtocolError::UnknownIdleAction(other.to_string())),
            };
            Ok(Command::Idle {
                action,
                at: parse_idle_timestamp(timestamp),
            })
        }
        "pause-toggle" => Ok(Command::PauseToggle),
        "status" => Ok(Command::Status),
        "quit" => Ok(Command::Quit),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_idle_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(err) => {
            tracing::warn!(timestamp = raw, error = %err, "invalid idle timestamp, using receipt time");
            None
        }
    }
}

/// Formats an idle command for the wire.
pub fn idle_command(action: IdleAction, at: DateTime<Utc>) -> String {
    let verb = match action {
        IdleAction::Start => "start",
        IdleAction::End => "end",
    };
    format!("idle {verb} {}", at.to_rfc3339())
}

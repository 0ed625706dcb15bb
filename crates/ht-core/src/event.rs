//! Activity events produced by the focus pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The focused window as reported by the compositor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveWindow {
    /// Application name (window class).
    #[serde(default)]
    pub name: String,
    /// Window title.
    #[serde(default)]
    pub title: String,
}

impl ActiveWindow {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
        }
    }

    /// Returns true when both the name and the title are empty.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.title.is_empty()
    }
}

/// Canonical event kinds. The string forms are what gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WindowChanged,
    IdleStart,
    IdleEnd,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WindowChanged => "activewindow",
            Self::IdleStart => "idle_start",
            Self::IdleEnd => "idle_end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activewindow" => Ok(Self::WindowChanged),
            "idle_start" => Ok(Self::IdleStart),
            "idle_end" => Ok(Self::IdleEnd),
            _ => Err(UnknownEventKind(s.to_string())),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown event kind strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(String);

/// A timestamped focus change or idle boundary.
///
/// The serialized form is the flat-file line format:
/// `{"timestamp": ..., "eventType": ..., "eventData": {"name": ..., "title": ...}, "isIdle": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "eventType")]
    pub kind: EventKind,
    #[serde(rename = "eventData", default)]
    pub window: ActiveWindow,
    #[serde(rename = "isIdle", default)]
    pub is_idle: bool,
}

impl ActivityEvent {
    pub const fn window_changed(window: ActiveWindow, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: EventKind::WindowChanged,
            window,
            is_idle: false,
        }
    }

    pub fn idle_start(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: EventKind::IdleStart,
            window: ActiveWindow::default(),
            is_idle: true,
        }
    }

    pub fn idle_end(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: EventKind::IdleEnd,
            window: ActiveWindow::default(),
            is_idle: false,
        }
    }
}

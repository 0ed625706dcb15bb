//! In-process idle detection.
//!
//! Used when no external idle manager reports idle over the control socket.
//! Activity is inferred from recorded focus changes: after `threshold` without
//! one, an idle period begins at `last_activity + threshold`; the next recorded
//! change ends it. The end is never stamped before the start, even when the
//! change that ends it was observed earlier and released late by the debouncer.

use chrono::{DateTime, Duration, Utc};

use crate::event::ActivityEvent;

/// Default inactivity threshold (15 minutes).
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::minutes(15);

#[derive(Debug, Clone)]
pub struct IdleTimer {
    threshold: Duration,
    last_activity: DateTime<Utc>,
    /// Start of the current idle period.
    idle_since: Option<DateTime<Utc>>,
}

impl IdleTimer {
    pub const fn new(threshold: Duration, now: DateTime<Utc>) -> Self {
        Self {
            threshold,
            last_activity: now,
            idle_since: None,
        }
    }

    pub const fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    /// Notes activity at `at`. Returns the idle-end marker if this ends an idle
    /// period, stamped no earlier than the period's start.
    pub fn record_activity(&mut self, at: DateTime<Utc>) -> Option<ActivityEvent> {
        let end = self.idle_since.take().map(|since| at.max(since));
        let at = end.unwrap_or(at);
        if at > self.last_activity {
            self.last_activity = at;
        }
        end.map(ActivityEvent::idle_end)
    }

    /// Returns the idle-start marker once the threshold has passed without activity.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<ActivityEvent> {
        if self.idle_since.is_some() || now - self.last_activity < self.threshold {
            return None;
        }
        let since = self.last_activity + self.threshold;
        self.idle_since = Some(since);
        Some(ActivityEvent::idle_start(since))
    }
}

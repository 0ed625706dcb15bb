//! Debouncing of raw window-focus notifications.
//!
//! The compositor reports every focus and title change, including sub-second
//! alt-tab churn and shell prompts rewriting terminal titles. [`ActivityFilter`]
//! reduces that stream to meaningful activity changes using two independent
//! windows:
//!
//! - a general window: a switch arriving too soon after the previous change is
//!   held back as a pending candidate and only emitted once it has settled
//! - a terminal window: per terminal application, title changes arriving too
//!   soon after the last sighting of that application are dropped; a switch
//!   into the terminal that is still pending survives with the latest title
//!
//! Exact repeats of the last emitted window are always dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::event::{ActiveWindow, ActivityEvent};
use crate::state::DaemonState;

/// Application names treated as terminal emulators by default.
pub const DEFAULT_TERMINAL_EMULATORS: &[&str] = &[
    "kitty",
    "alacritty",
    "terminology",
    "konsole",
    "gnome-terminal",
    "xfce4-terminal",
    "xterm",
    "urxvt",
    "termite",
    "st",
    "foot",
    "wezterm",
];

/// Debounce configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum spacing between emitted title changes of one terminal application.
    /// Default: 3 seconds.
    pub terminal_debounce: Duration,

    /// Minimum quiet period before a focus switch counts as settled.
    /// Zero disables the general window. Default: 500 milliseconds.
    pub general_debounce: Duration,

    /// Application names that get the terminal window.
    pub terminal_emulators: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            terminal_debounce: Duration::seconds(3),
            general_debounce: Duration::milliseconds(500),
            terminal_emulators: DEFAULT_TERMINAL_EMULATORS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Receiver of raw focus notifications.
///
/// The producer calls [`poll_pending`](Self::poll_pending) periodically and
/// before each notification, then [`on_window_changed`](Self::on_window_changed)
/// for the notification itself, forwarding whatever events come back.
pub trait WindowEventSink {
    /// Handles one raw notification, returning the event to record, if any.
    fn on_window_changed(&mut self, window: &ActiveWindow) -> Option<ActivityEvent>;

    /// Releases an event that was held back until it settled.
    fn poll_pending(&mut self) -> Option<ActivityEvent> {
        None
    }
}

/// Stateful debouncer between the compositor and the event queue.
///
/// Owned by the producer worker; the only shared input is the pause flag.
#[derive(Debug)]
pub struct ActivityFilter {
    config: PipelineConfig,
    state: Arc<DaemonState>,
    /// Last sighting time per application name.
    sightings: HashMap<String, DateTime<Utc>>,
    last_emitted: Option<ActiveWindow>,
    last_seen: Option<ActiveWindow>,
    pending: Option<ActivityEvent>,
}

impl ActivityFilter {
    pub fn new(config: PipelineConfig, state: Arc<DaemonState>) -> Self {
        Self {
            config,
            state,
            sightings: HashMap::new(),
            last_emitted: None,
            last_seen: None,
            pending: None,
        }
    }

    fn is_terminal(&self, name: &str) -> bool {
        self.config.terminal_emulators.iter().any(|t| t == name)
    }

    /// Processes a notification observed at `now`.
    pub fn observe_at(
        &mut self,
        window: &ActiveWindow,
        now: DateTime<Utc>,
    ) -> Option<ActivityEvent> {
        if window.is_empty() || self.state.is_paused() {
            return None;
        }

        if self.last_emitted.as_ref() == Some(window) {
            // Switching back to what was last recorded cancels any churn in between.
            self.pending = None;
            self.record_sighting(window, now);
            return None;
        }

        let previous_change = self
            .last_seen
            .as_ref()
            .and_then(|prev| self.sightings.get(&prev.name))
            .copied();
        let previous_sighting = self.record_sighting(window, now);

        let terminal_suppressed = self.is_terminal(&window.name)
            && previous_sighting
                .is_some_and(|t| now - t < self.config.terminal_debounce);
        if terminal_suppressed {
            tracing::trace!(
                app = %window.name,
                title = %window.title,
                "terminal title change debounced"
            );
            self.hold_terminal_switch(window, now);
            return None;
        }

        let general_suppressed = self.config.general_debounce > Duration::zero()
            && previous_change.is_some_and(|t| now - t < self.config.general_debounce);
        if general_suppressed {
            tracing::trace!(app = %window.name, "focus change held until settled");
            if self.pending.as_ref().is_none_or(|p| p.window != *window) {
                self.pending = Some(ActivityEvent::window_changed(window.clone(), now));
            }
            return None;
        }

        self.pending = None;
        self.last_emitted = Some(window.clone());
        Some(ActivityEvent::window_changed(window.clone(), now))
    }

    /// Emits the pending candidate once the general window has passed since it
    /// was observed. The event keeps its observation timestamp.
    pub fn poll_pending_at(&mut self, now: DateTime<Utc>) -> Option<ActivityEvent> {
        if self.state.is_paused() {
            self.pending = None;
            return None;
        }
        let settled = self
            .pending
            .as_ref()
            .is_some_and(|p| now - p.timestamp >= self.config.general_debounce);
        if !settled {
            return None;
        }

        let event = self.pending.take()?;
        if self.last_emitted.as_ref() == Some(&event.window) {
            return None;
        }
        self.last_emitted = Some(event.window.clone());
        Some(event)
    }

    /// Handles a terminal notification dropped by the terminal window.
    ///
    /// Title churn inside the recorded terminal discards any pending candidate.
    /// Otherwise focus is moving into the terminal, so it stays pending with the
    /// latest title. A candidate already pending for the same terminal keeps its
    /// observation time.
    fn hold_terminal_switch(&mut self, window: &ActiveWindow, now: DateTime<Utc>) {
        if self
            .last_emitted
            .as_ref()
            .is_some_and(|last| last.name == window.name)
        {
            self.pending = None;
            return;
        }
        let observed = self
            .pending
            .as_ref()
            .filter(|p| p.window.name == window.name)
            .map_or(now, |p| p.timestamp);
        self.pending = Some(ActivityEvent::window_changed(window.clone(), observed));
    }

    /// Updates the sighting time for the window's application and the
    /// last-seen window, returning the application's previous sighting.
    fn record_sighting(
        &mut self,
        window: &ActiveWindow,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.last_seen = Some(window.clone());
        self.sightings.insert(window.name.clone(), now)
    }
}

impl WindowEventSink for ActivityFilter {
    fn on_window_changed(&mut self, window: &ActiveWindow) -> Option<ActivityEvent> {
        self.observe_at(window, Utc::now())
    }

    fn poll_pending(&mut self) -> Option<ActivityEvent> {
        self.poll_pending_at(Utc::now())
    }
}

//! Process-wide daemon state shared between workers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutable state shared by the focus producer and the control socket.
///
/// Passed to each worker as `Arc<DaemonState>`; a single mutex guards it so a
/// control command is atomic with respect to the filter reading the flag.
#[derive(Debug, Default)]
pub struct DaemonState {
    inner: Mutex<StateInner>,
}

#[derive(Debug, Default)]
struct StateInner {
    paused: bool,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    /// Flips the pause flag and returns the new value.
    pub fn toggle_pause(&self) -> bool {
        let mut inner = self.lock();
        inner.paused = !inner.paused;
        inner.paused
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        // The guarded data is a plain flag, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

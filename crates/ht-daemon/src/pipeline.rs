//! Producer and writer workers on either side of the event queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ht_core::{ActivityEvent, DaemonState, IdleTimer, WindowEventSink};
use ht_db::{BatchSink, BatchWriter, WriterStats};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::shutdown::Shutdown;
use crate::source::FocusSource;

/// How often the producer releases settled events and checks for idleness.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Feeds filtered focus events into the queue.
pub struct Producer<F> {
    filter: F,
    state: Arc<DaemonState>,
    idle: Option<IdleTimer>,
    events: mpsc::Sender<ActivityEvent>,
    shutdown: Shutdown,
    emitted: u64,
}

impl<F: WindowEventSink + Send> Producer<F> {
    pub const fn new(
        filter: F,
        state: Arc<DaemonState>,
        events: mpsc::Sender<ActivityEvent>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            filter,
            state,
            idle: None,
            events,
            shutdown,
            emitted: 0,
        }
    }

    /// Enables in-process idle detection.
    #[must_use]
    pub const fn with_idle_timer(mut self, timer: IdleTimer) -> Self {
        self.idle = Some(timer);
        self
    }

    /// Runs until shutdown or until the source ends, which itself triggers
    /// shutdown. Returns the number of events enqueued.
    pub async fn run<S: FocusSource>(mut self, mut source: S) -> u64 {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.triggered() => break,
                _ = tick.tick() => {
                    if !self.on_tick().await {
                        break;
                    }
                }
                next = source.next_window() => match next {
                    Ok(Some(window)) => {
                        let settled = self.filter.poll_pending();
                        let event = self.filter.on_window_changed(&window);
                        if !self.emit(settled).await || !self.emit(event).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("focus source ended");
                        self.shutdown.trigger();
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "focus source failed");
                        self.shutdown.trigger();
                        break;
                    }
                },
            }
        }

        tracing::debug!(emitted = self.emitted, "producer stopped");
        self.emitted
    }

    async fn on_tick(&mut self) -> bool {
        let settled = self.filter.poll_pending();
        if !self.emit(settled).await {
            return false;
        }
        if self.state.is_paused() {
            return true;
        }
        let idle_start = self.idle.as_mut().and_then(|timer| timer.poll(Utc::now()));
        if let Some(event) = idle_start {
            tracing::info!(at = %event.timestamp, "no activity, idle period started");
            return self.send(event).await;
        }
        true
    }

    /// Enqueues a window event, preceded by an idle end if it ends an idle period.
    async fn emit(&mut self, event: Option<ActivityEvent>) -> bool {
        let Some(mut event) = event else {
            return true;
        };
        let idle_end = self
            .idle
            .as_mut()
            .and_then(|timer| timer.record_activity(event.timestamp));
        if let Some(idle_end) = idle_end {
            tracing::info!(at = %idle_end.timestamp, "activity resumed");
            // A settled event may carry an observation time from before the idle start.
            event.timestamp = event.timestamp.max(idle_end.timestamp);
            if !self.send(idle_end).await {
                return false;
            }
        }
        tracing::debug!(app = %event.window.name, title = %event.window.title, "window changed");
        self.send(event).await
    }

    async fn send(&mut self, event: ActivityEvent) -> bool {
        if self.events.send(event).await.is_err() {
            tracing::warn!("event queue closed, producer stopping");
            return false;
        }
        self.emitted += 1;
        true
    }
}

/// What woke the writer.
enum WriterStep {
    Received(Option<ActivityEvent>),
    Deadline,
    Shutdown,
}

/// Drains the queue into `writer` until every sender is gone.
///
/// Storage calls block, so the loop runs on the blocking pool and only waits
/// on the queue, the commit deadline and shutdown through the runtime handle.
/// On shutdown the open batch is committed right away; events still queued
/// behind it are drained and committed before returning.
pub async fn run_writer<S>(
    writer: BatchWriter<S>,
    events: mpsc::Receiver<ActivityEvent>,
    shutdown: Shutdown,
) -> WriterStats
where
    S: BatchSink + Send + 'static,
{
    let handle = Handle::current();
    let task = tokio::task::spawn_blocking(move || write_loop(&handle, writer, events, &shutdown));
    match task.await {
        Ok(stats) => stats,
        Err(err) => {
            tracing::warn!(error = %err, "writer thread failed");
            WriterStats::default()
        }
    }
}

fn write_loop<S: BatchSink>(
    handle: &Handle,
    mut writer: BatchWriter<S>,
    mut events: mpsc::Receiver<ActivityEvent>,
    shutdown: &Shutdown,
) -> WriterStats {
    let mut flushed_on_shutdown = false;
    loop {
        let deadline = writer.next_deadline();
        let step = handle.block_on(async {
            tokio::select! {
                received = events.recv() => WriterStep::Received(received),
                () = sleep_until(deadline) => WriterStep::Deadline,
                () = shutdown.triggered(), if !flushed_on_shutdown => WriterStep::Shutdown,
            }
        });
        match step {
            WriterStep::Received(Some(event)) => writer.write(&event),
            WriterStep::Received(None) => break,
            WriterStep::Deadline => {
                writer.flush_if_due_at(Instant::now());
            }
            WriterStep::Shutdown => {
                tracing::debug!(pending = writer.pending_rows(), "shutdown observed, committing");
                writer.flush();
                flushed_on_shutdown = true;
            }
        }
    }

    let stats = writer.finish();
    tracing::info!(
        committed = stats.committed,
        skipped = stats.skipped,
        lost = stats.lost,
        "writer stopped"
    );
    stats
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

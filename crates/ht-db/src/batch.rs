//! Batched transactions for the persistence writer.
//!
//! [`BatchWriter`] keeps at most one transaction open on a [`BatchSink`] and
//! commits it once either the row threshold is reached or the commit interval
//! has elapsed since the last commit.

use std::time::{Duration, Instant};

use ht_core::ActivityEvent;

use crate::DbError;

/// A store that accepts events inside explicit transactions.
pub trait BatchSink {
    fn begin(&mut self) -> Result<(), DbError>;
    fn insert(&mut self, event: &ActivityEvent) -> Result<(), DbError>;
    fn commit(&mut self) -> Result<(), DbError>;
    fn rollback(&mut self) -> Result<(), DbError>;
}

impl<S: BatchSink + ?Sized> BatchSink for Box<S> {
    fn begin(&mut self) -> Result<(), DbError> {
        (**self).begin()
    }

    fn insert(&mut self, event: &ActivityEvent) -> Result<(), DbError> {
        (**self).insert(event)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        (**self).rollback()
    }
}

/// When to close a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Commit once this many rows are in the open transaction.
    pub max_rows: usize,
    /// Commit once this much time has passed since the last commit.
    pub max_age: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_rows: 100,
            max_age: Duration::from_secs(5),
        }
    }
}

/// Counters reported when the writer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Rows that made it into a committed transaction.
    pub committed: u64,
    /// Rows whose insert failed and were skipped.
    pub skipped: u64,
    /// Successful commits.
    pub batches: u64,
    /// Commits that failed and were rolled back.
    pub failed_commits: u64,
    /// Rows discarded by failed commits.
    pub lost: u64,
}

pub struct BatchWriter<S> {
    sink: S,
    policy: BatchPolicy,
    open: bool,
    rows: usize,
    last_commit: Instant,
    stats: WriterStats,
}

impl<S: BatchSink> BatchWriter<S> {
    pub fn new(sink: S, policy: BatchPolicy) -> Self {
        Self::new_at(sink, policy, Instant::now())
    }

    pub const fn new_at(sink: S, policy: BatchPolicy, now: Instant) -> Self {
        Self {
            sink,
            policy,
            open: false,
            rows: 0,
            last_commit: now,
            stats: WriterStats {
                committed: 0,
                skipped: 0,
                batches: 0,
                failed_commits: 0,
                lost: 0,
            },
        }
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Rows inserted into the open transaction and not yet committed.
    pub const fn pending_rows(&self) -> usize {
        self.rows
    }

    pub fn write(&mut self, event: &ActivityEvent) {
        self.write_at(event, Instant::now());
    }

    /// Inserts one event, committing afterwards if the batch is due.
    ///
    /// A failed insert is logged and skipped; the open batch is kept.
    pub fn write_at(&mut self, event: &ActivityEvent, now: Instant) {
        if !self.open {
            if let Err(err) = self.sink.begin() {
                tracing::warn!(error = %err, kind = %event.kind, "failed to open transaction; event skipped");
                self.stats.skipped += 1;
                return;
            }
            self.open = true;
        }

        match self.sink.insert(event) {
            Ok(()) => self.rows += 1,
            Err(err) => {
                tracing::warn!(error = %err, kind = %event.kind, "failed to insert event; skipped");
                self.stats.skipped += 1;
                return;
            }
        }

        self.flush_if_due_at(now);
    }

    /// Whether the open batch should be committed at `now`.
    pub fn commit_due(&self, now: Instant) -> bool {
        self.open
            && (self.rows >= self.policy.max_rows
                || now.saturating_duration_since(self.last_commit) >= self.policy.max_age)
    }

    /// Commits the open batch if it is due. Returns whether a commit was attempted.
    pub fn flush_if_due_at(&mut self, now: Instant) -> bool {
        if !self.commit_due(now) {
            return false;
        }
        self.commit_at(now);
        true
    }

    /// Commits whatever is pending.
    pub fn flush(&mut self) {
        if self.open {
            self.commit_at(Instant::now());
        }
    }

    /// When the open batch becomes due by age, if one is open.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open.then(|| self.last_commit + self.policy.max_age)
    }

    /// Commits the last batch and returns the final counters.
    pub fn finish(mut self) -> WriterStats {
        self.flush();
        self.stats
    }

    fn commit_at(&mut self, now: Instant) {
        let rows = self.rows;
        self.open = false;
        self.rows = 0;
        self.last_commit = now;

        match self.sink.commit() {
            Ok(()) => {
                self.stats.batches += 1;
                self.stats.committed += rows as u64;
                tracing::debug!(rows, "committed batch");
            }
            Err(err) => {
                self.stats.failed_commits += 1;
                self.stats.lost += rows as u64;
                tracing::warn!(error = %err, rows, "commit failed; batch rolled back");
                if let Err(err) = self.sink.rollback() {
                    tracing::debug!(error = %err, "rollback after failed commit");
                }
            }
        }
    }
}

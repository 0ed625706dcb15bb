//! Append-only JSON Lines activity log.
//!
//! One [`ActivityEvent`] per line, e.g.
//! `{"timestamp":"2024-01-01T00:00:00Z","eventType":"activewindow","eventData":{"name":"kitty","title":"vim"},"isIdle":false}`.
//! The file is only ever appended to. Readers skip lines that fail to parse.
//! A line torn by a failed or interrupted write is closed off before the next
//! batch, so it never swallows a well-formed event.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use ht_core::ActivityEvent;

use crate::{BatchSink, DbError};

/// Writer half of the flat-file log.
#[derive(Debug)]
pub struct JsonlLog {
    file: File,
    buffer: Vec<u8>,
    /// The file ends in the middle of a line.
    torn: bool,
}

impl JsonlLog {
    /// Opens the log for appending, creating the file if needed.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let torn = ends_mid_line(&mut file)?;
        if torn {
            tracing::warn!(path = %path.display(), "activity log ends with a partial line");
        }
        tracing::debug!(path = %path.display(), "opened activity log");
        Ok(Self {
            file,
            buffer: Vec::new(),
            torn,
        })
    }

    /// Writes the buffered batch, undoing a partial write on failure.
    fn write_batch(&mut self) -> io::Result<()> {
        let len = self.file.metadata()?.len();
        let result = self
            .file
            .write_all(&self.buffer)
            .and_then(|()| self.file.flush());
        if result.is_err() {
            match self.file.set_len(len) {
                Ok(()) => self.torn = false,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to truncate partial write");
                    self.torn = true;
                }
            }
        }
        result
    }
}

fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl BatchSink for JsonlLog {
    fn begin(&mut self) -> Result<(), DbError> {
        self.buffer.clear();
        if self.torn {
            self.buffer.push(b'\n');
        }
        Ok(())
    }

    fn insert(&mut self, event: &ActivityEvent) -> Result<(), DbError> {
        serde_json::to_writer(&mut self.buffer, event)?;
        self.buffer.push(b'\n');
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        let result = self.write_batch();
        if result.is_ok() {
            self.torn = false;
        }
        self.buffer.clear();
        result.map_err(DbError::from)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.buffer.clear();
        Ok(())
    }
}

/// Reads every parseable event from a log file, in file order.
///
/// A missing file reads as empty.
pub fn read_events(path: &Path) -> Result<Vec<ActivityEvent>, DbError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActivityEvent>(&line) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "skipping malformed log line");
            }
        }
    }
    Ok(events)
}

/// Reads events with `after <= timestamp < before`.
pub fn query_events(
    path: &Path,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) -> Result<Vec<ActivityEvent>, DbError> {
    let mut events = read_events(path)?;
    events.retain(|e| {
        after.is_none_or(|after| e.timestamp >= after)
            && before.is_none_or(|before| e.timestamp < before)
    });
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}

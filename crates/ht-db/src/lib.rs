//! Storage layer for the activity tracker.
//!
//! Provides persistence for activity events using `rusqlite`, plus an
//! append-only JSONL alternative in [`jsonl`].
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The daemon moves one instance into its writer worker; report commands open
//! their own.
//!
//! # Schema
//!
//! ```text
//! meta(key TEXT PRIMARY KEY, value TEXT)            -- schema_version row
//! events(id INTEGER PRIMARY KEY, timestamp TEXT NOT NULL, event_type TEXT NOT NULL,
//!        window_name TEXT, window_title TEXT, is_idle BOOLEAN DEFAULT 0)
//! ```
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 UTC with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`), so lexicographic ordering matches
//! chronological ordering and SQLite date functions can parse them.

pub mod batch;
pub mod jsonl;

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use ht_core::{
    ActiveWindow, ActivityEvent, Aggregation, EventKind, KeywordFilter, SubjectTime, TimeSummary,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

pub use batch::{BatchPolicy, BatchSink, BatchWriter, WriterStats};
pub use jsonl::JsonlLog;

/// Current schema version stamped into `meta`.
pub const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Filesystem error from the flat-file log.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to encode an event for the flat-file log.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The database was written by an incompatible version.
    #[error("unsupported schema version {found} (expected {})", SCHEMA_VERSION)]
    SchemaVersion { found: String },
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for event {event_id}: {timestamp}")]
    TimestampParse {
        event_id: i64,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row has an event type this version does not know.
    #[error("invalid event type for event {event_id}: {event_type}")]
    InvalidEventKind { event_id: i64, event_type: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database uses write-ahead logging and a busy timeout, and the schema
    /// is initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema and checks the version stamp.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            -- timestamp: RFC 3339 UTC, millisecond precision
            -- event_type: 'activewindow', 'idle_start' or 'idle_end'
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                window_name TEXT,
                window_title TEXT,
                is_idle BOOLEAN DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_window ON events(window_name);
            ",
        )?;

        let version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(found) if found == SCHEMA_VERSION.to_string() => {}
            Some(found) => return Err(DbError::SchemaVersion { found }),
        }
        Ok(())
    }

    /// Inserts one event into whatever transaction is open, returning its row ID.
    pub fn insert_event(&self, event: &ActivityEvent) -> Result<i64, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "
            INSERT INTO events (timestamp, event_type, window_name, window_title, is_idle)
            VALUES (?, ?, ?, ?, ?)
            ",
        )?;
        stmt.execute(params![
            format_timestamp(event.timestamp),
            event.kind.as_str(),
            event.window.name,
            event.window.title,
            event.is_idle,
        ])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Inserts a batch of events in a single transaction.
    pub fn insert_events(&mut self, events: &[ActivityEvent]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO events (timestamp, event_type, window_name, window_title, is_idle)
                VALUES (?, ?, ?, ?, ?)
                ",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    format_timestamp(event.timestamp),
                    event.kind.as_str(),
                    event.window.name,
                    event.window.title,
                    event.is_idle,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Number of stored events.
    pub fn event_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
    }

    /// Lists events within a time range, ordered by timestamp then insertion.
    ///
    /// The range is inclusive of `start` and exclusive of `end`.
    pub fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        self.query_events(Some(start), Some(end))
    }

    /// Lists events with optional bounds (`after` inclusive, `before` exclusive).
    pub fn query_events(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ActivityEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, timestamp, event_type, window_name, window_title, is_idle
            FROM events
            WHERE (?1 IS NULL OR timestamp >= ?1) AND (?2 IS NULL OR timestamp < ?2)
            ORDER BY timestamp ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![after.map(format_timestamp), before.map(format_timestamp)],
            StoredRow::from_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Computes per-(application, title) durations inside the database.
    ///
    /// Equivalent to [`ht_core::replay`] over [`get_events`](Self::get_events)
    /// for the same range: each row is paired with its successor, the subject
    /// is the latest window change at or before the row, and rows inside an
    /// idle period or without a strictly later successor contribute nothing.
    pub fn subject_times(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SubjectTime>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            WITH ordered AS (
                SELECT
                    id,
                    timestamp,
                    event_type,
                    window_name,
                    window_title,
                    LEAD(timestamp) OVER w AS next_timestamp,
                    SUM(CASE WHEN event_type = 'activewindow' THEN 1 ELSE 0 END) OVER w
                        AS subject_group,
                    SUM(CASE WHEN event_type IN ('idle_start', 'idle_end') THEN 1 ELSE 0 END)
                        OVER w AS idle_group
                FROM events
                WHERE timestamp >= ?1 AND timestamp < ?2
                WINDOW w AS (ORDER BY timestamp, id)
            ),
            attributed AS (
                SELECT
                    timestamp,
                    next_timestamp,
                    subject_group,
                    FIRST_VALUE(event_type)
                        OVER (PARTITION BY idle_group ORDER BY timestamp, id) AS idle_marker,
                    FIRST_VALUE(window_name)
                        OVER (PARTITION BY subject_group ORDER BY timestamp, id) AS subject_name,
                    FIRST_VALUE(window_title)
                        OVER (PARTITION BY subject_group ORDER BY timestamp, id) AS subject_title
                FROM ordered
            )
            SELECT
                subject_name,
                subject_title,
                SUM(CAST(ROUND(
                    (unixepoch(next_timestamp, 'subsec') - unixepoch(timestamp, 'subsec')) * 1000
                ) AS INTEGER)) AS duration_ms
            FROM attributed
            WHERE next_timestamp IS NOT NULL
              AND next_timestamp > timestamp
              AND subject_group > 0
              AND idle_marker <> 'idle_start'
            GROUP BY subject_name, subject_title
            ORDER BY subject_name, subject_title
            ",
        )?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            |row| {
                let name: Option<String> = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                let duration_ms: i64 = row.get(2)?;
                Ok(SubjectTime {
                    name: name.unwrap_or_default(),
                    title: title.unwrap_or_default(),
                    total: Duration::milliseconds(duration_ms),
                })
            },
        )?;
        let mut subjects = Vec::new();
        for row in rows {
            subjects.push(row?);
        }
        Ok(subjects)
    }

    /// Aggregates a range with the storage-native computation.
    pub fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        keywords: &KeywordFilter,
    ) -> Result<Aggregation, DbError> {
        let subjects = self.subject_times(start, end)?;
        Ok(Aggregation::from_subject_times(subjects, keywords))
    }

    /// Time per application, longest first.
    pub fn get_application_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSummary>, DbError> {
        Ok(self
            .aggregate(start, end, &KeywordFilter::default())?
            .applications())
    }

    /// Time per `app - title` window, longest first.
    pub fn get_window_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSummary>, DbError> {
        Ok(self
            .aggregate(start, end, &KeywordFilter::default())?
            .windows())
    }

    /// Time per application, counting only windows matching a keyword.
    pub fn get_keyword_filtered_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        keywords: &KeywordFilter,
    ) -> Result<Vec<TimeSummary>, DbError> {
        Ok(self.aggregate(start, end, keywords)?.applications())
    }
}

impl BatchSink for Database {
    fn begin(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn insert(&mut self, event: &ActivityEvent) -> Result<(), DbError> {
        self.insert_event(event)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[derive(Debug)]
struct StoredRow {
    id: i64,
    timestamp: String,
    event_type: String,
    window_name: Option<String>,
    window_title: Option<String>,
    is_idle: bool,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            event_type: row.get(2)?,
            window_name: row.get(3)?,
            window_title: row.get(4)?,
            is_idle: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
        })
    }

    fn into_event(self) -> Result<ActivityEvent, DbError> {
        let timestamp = parse_timestamp(&self.timestamp, self.id)?;
        let kind: EventKind =
            self.event_type
                .parse()
                .map_err(|_| DbError::InvalidEventKind {
                    event_id: self.id,
                    event_type: self.event_type.clone(),
                })?;
        Ok(ActivityEvent {
            timestamp,
            kind,
            window: ActiveWindow {
                name: self.window_name.unwrap_or_default(),
                title: self.window_title.unwrap_or_default(),
            },
            is_idle: self.is_idle,
        })
    }
}

fn parse_timestamp(timestamp: &str, event_id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            event_id,
            timestamp: timestamp.to_string(),
            source,
        })
}

/// Formats a timestamp the way it is stored.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use ht_core::replay;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    fn focus(secs: i64, name: &str, title: &str) -> ActivityEvent {
        ActivityEvent::window_changed(ActiveWindow::new(name, title), at(secs))
    }

    fn everything() -> (DateTime<Utc>, DateTime<Utc>) {
        (at(-86_400), at(86_400))
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert_eq!(db.event_count().unwrap(), 0);
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(table_columns(&db.conn, "meta"), ["key", "value"]);
        assert_eq!(
            table_columns(&db.conn, "events"),
            [
                "id",
                "timestamp",
                "event_type",
                "window_name",
                "window_title",
                "is_idle"
            ]
        );
        let indexes = index_names(&db.conn, "events");
        assert!(indexes.contains("idx_events_timestamp"));
        assert!(indexes.contains("idx_events_window"));

        let version: String = db
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
    }

    #[test]
    fn reopen_keeps_single_version_row() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ht.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn open_uses_write_ahead_logging() {
        let temp = tempfile::tempdir().unwrap();
        let db = Database::open(&temp.path().join("ht.db")).unwrap();
        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ht.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn
                .execute(
                    "UPDATE meta SET value = '99' WHERE key = 'schema_version'",
                    [],
                )
                .unwrap();
        }

        let err = Database::open(&path).err().unwrap();
        assert!(matches!(err, DbError::SchemaVersion { ref found } if found == "99"));
    }

    #[test]
    fn stores_timestamps_with_millisecond_precision() {
        let db = Database::open_in_memory().unwrap();
        let event = ActivityEvent::window_changed(
            ActiveWindow::new("firefox", "Docs"),
            at(0) + Duration::microseconds(1_500),
        );
        db.insert_event(&event).unwrap();

        let stored: String = db
            .conn
            .query_row("SELECT timestamp FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, "2024-01-01T00:00:00.001Z");
    }

    #[test]
    fn get_events_returns_ordered_half_open_range() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_events(&[
            focus(20, "B", "b"),
            focus(0, "A", "a"),
            ActivityEvent::idle_start(at(30)),
            focus(40, "C", "c"),
        ])
        .unwrap();

        let events = db.get_events(at(0), at(40)).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::WindowChanged,
                EventKind::WindowChanged,
                EventKind::IdleStart
            ]
        );
        assert_eq!(events[0].window.name, "A");
        assert_eq!(events[1].window.name, "B");
        assert!(events[2].is_idle);
        assert!(events[2].window.is_empty());

        assert!(db.get_events(at(40), at(0)).unwrap().is_empty());
    }

    #[test]
    fn unknown_event_type_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO events (timestamp, event_type) VALUES ('2024-01-01T00:00:00.000Z', 'bogus')",
                [],
            )
            .unwrap();
        let err = db.query_events(None, None).unwrap_err();
        assert!(matches!(err, DbError::InvalidEventKind { .. }));
    }

    #[test]
    fn application_summary_excludes_idle() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_events(&[
            focus(0, "A", "a"),
            focus(10, "B", "b"),
            ActivityEvent::idle_start(at(10)),
            ActivityEvent::idle_end(at(40)),
            focus(50, "B", "b"),
        ])
        .unwrap();

        let (start, end) = everything();
        let summary = db.get_application_summary(start, end).unwrap();
        assert_eq!(
            summary,
            [
                TimeSummary {
                    name: "A".to_string(),
                    total: Duration::seconds(10),
                },
                TimeSummary {
                    name: "B".to_string(),
                    total: Duration::seconds(10),
                },
            ]
        );
    }

    #[test]
    fn keyword_summary_filters_subjects() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_events(&[
            focus(0, "firefox", "ProjectX board"),
            focus(100, "firefox", "news"),
            focus(130, "code", "projectx/lib.rs"),
            focus(200, "slack", "random"),
        ])
        .unwrap();

        let (start, end) = everything();
        let summary = db
            .get_keyword_filtered_summary(start, end, &KeywordFilter::parse("PROJECTX"))
            .unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "firefox");
        assert_eq!(summary[0].total, Duration::seconds(100));
        assert_eq!(summary[1].name, "code");
        assert_eq!(summary[1].total, Duration::seconds(70));

        let windows = db.get_window_summary(start, end).unwrap();
        assert_eq!(windows[0].name, "firefox - ProjectX board");
    }

    #[test]
    fn native_and_replay_totals_agree() {
        let mut db = Database::open_in_memory().unwrap();
        let events = vec![
            ActivityEvent::idle_end(at(-5)),
            focus(0, "A", "a"),
            focus(3, "B", "b"),
            focus(3, "C", "c"),
            ActivityEvent::idle_start(at(10)),
            ActivityEvent::idle_start(at(12)),
            ActivityEvent::idle_end(at(70)),
            focus(75, "A", "a2"),
            ActivityEvent::idle_end(at(76)),
            focus(90, "B", "b"),
            ActivityEvent::window_changed(
                ActiveWindow::new("A", "a"),
                at(91) + Duration::milliseconds(250),
            ),
            focus(200, "C", "c"),
            ActivityEvent::idle_start(at(150)),
            ActivityEvent::idle_end(at(160)),
        ];
        db.insert_events(&events).unwrap();

        let (start, end) = everything();
        let native = db.subject_times(start, end).unwrap();
        let replayed = replay(&db.get_events(start, end).unwrap());
        assert_eq!(native, replayed);
        assert!(!native.is_empty());

        let filter = KeywordFilter::parse("a");
        assert_eq!(
            db.aggregate(start, end, &filter).unwrap(),
            Aggregation::from_subject_times(replayed, &filter)
        );
    }

    #[test]
    fn range_bounds_apply_to_both_paths() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_events(&[
            focus(0, "A", "a"),
            focus(60, "B", "b"),
            focus(120, "C", "c"),
            focus(180, "A", "a"),
        ])
        .unwrap();

        let native = db.subject_times(at(60), at(180)).unwrap();
        let replayed = replay(&db.get_events(at(60), at(180)).unwrap());
        assert_eq!(native, replayed);
        assert_eq!(native.len(), 1);
        assert_eq!(native[0].name, "B");
        assert_eq!(native[0].total, Duration::seconds(60));
    }

    #[test]
    fn batch_sink_rollback_discards_rows() {
        let mut db = Database::open_in_memory().unwrap();
        db.begin().unwrap();
        BatchSink::insert(&mut db, &focus(0, "A", "a")).unwrap();
        db.rollback().unwrap();
        assert_eq!(db.event_count().unwrap(), 0);

        db.begin().unwrap();
        BatchSink::insert(&mut db, &focus(0, "A", "a")).unwrap();
        db.commit().unwrap();
        assert_eq!(db.event_count().unwrap(), 1);
    }
}

//! Duration aggregation over recorded activity events.
//!
//! # Algorithm
//!
//! Events are ordered by timestamp (stable, so ties keep recording order) and
//! walked as adjacent pairs `(current, next)`:
//!
//! 1. The subject of a pair is the most recent window change at or before
//!    `current`. Idle markers never become subjects, so time after an idle end
//!    goes back to the window that was focused before idle began.
//! 2. An idle start opens an idle period and an idle end closes it; pairs whose
//!    `current` falls inside an idle period contribute nothing. The pair that
//!    ends at an idle start still counts.
//! 3. Pairs where `next` is not strictly after `current` are skipped.
//! 4. `next - current` is attributed to the subject.
//!
//! The per-subject totals are then rolled up per application and per window,
//! with the keyword filter applied to each subject. The storage layer produces
//! the same per-subject totals with a windowed SQL query and shares the roll-up.

use std::collections::{BTreeMap, HashMap};

use chrono::Duration;

use crate::event::{ActivityEvent, EventKind};

/// Total time for one display key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSummary {
    pub name: String,
    pub total: Duration,
}

/// Total time attributed to one (application, title) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTime {
    pub name: String,
    pub title: String,
    pub total: Duration,
}

/// Composite display key for a window.
pub fn window_key(name: &str, title: &str) -> String {
    format!("{name} - {title}")
}

/// Case-insensitive keyword match against application name or window title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Builds a filter, trimming and lowercasing keywords and dropping empty ones.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Parses a comma-separated keyword list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// An empty filter matches everything.
    pub fn matches(&self, name: &str, title: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        let title = title.to_lowercase();
        self.keywords
            .iter()
            .any(|k| name.contains(k.as_str()) || title.contains(k.as_str()))
    }
}

/// Replays events into per-subject totals, sorted by (name, title).
pub fn replay(events: &[ActivityEvent]) -> Vec<SubjectTime> {
    let mut ordered: Vec<&ActivityEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut totals: BTreeMap<(&str, &str), Duration> = BTreeMap::new();
    let mut subject: Option<&ActivityEvent> = None;
    let mut idle = false;
    let mut anomalies = 0_usize;

    for pair in ordered.windows(2) {
        let (current, next) = (pair[0], pair[1]);
        match current.kind {
            EventKind::WindowChanged => subject = Some(current),
            EventKind::IdleStart => idle = true,
            EventKind::IdleEnd => idle = false,
        }

        if next.timestamp <= current.timestamp {
            anomalies += 1;
            continue;
        }
        if idle {
            continue;
        }
        let Some(subject) = subject else {
            continue;
        };

        *totals
            .entry((subject.window.name.as_str(), subject.window.title.as_str()))
            .or_insert_with(Duration::zero) += next.timestamp - current.timestamp;
    }

    if anomalies > 0 {
        tracing::debug!(anomalies, "skipped intervals with non-increasing timestamps");
    }

    totals
        .into_iter()
        .map(|((name, title), total)| SubjectTime {
            name: name.to_string(),
            title: title.to_string(),
            total,
        })
        .collect()
}

/// Aggregated durations for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Time per application name.
    pub by_application: HashMap<String, Duration>,
    /// Time per `app - title` key.
    pub by_window: HashMap<String, Duration>,
    /// Time matching the keyword filter. Zero when the filter is empty.
    pub matched_total: Duration,
}

impl Aggregation {
    /// Rolls per-subject totals up into application and window summaries.
    pub fn from_subject_times<I>(subjects: I, filter: &KeywordFilter) -> Self
    where
        I: IntoIterator<Item = SubjectTime>,
    {
        let mut aggregation = Self::default();
        for subject in subjects {
            if !filter.matches(&subject.name, &subject.title) {
                continue;
            }
            if !filter.is_empty() {
                aggregation.matched_total += subject.total;
            }
            *aggregation
                .by_window
                .entry(window_key(&subject.name, &subject.title))
                .or_insert_with(Duration::zero) += subject.total;
            *aggregation
                .by_application
                .entry(subject.name)
                .or_insert_with(Duration::zero) += subject.total;
        }
        aggregation
    }

    /// Application summaries, longest first.
    pub fn applications(&self) -> Vec<TimeSummary> {
        sorted_summaries(&self.by_application)
    }

    /// Window summaries, longest first.
    pub fn windows(&self) -> Vec<TimeSummary> {
        sorted_summaries(&self.by_window)
    }
}

/// Replays events and rolls the result up.
pub fn aggregate(events: &[ActivityEvent], filter: &KeywordFilter) -> Aggregation {
    Aggregation::from_subject_times(replay(events), filter)
}

fn sorted_summaries(durations: &HashMap<String, Duration>) -> Vec<TimeSummary> {
    let mut summaries: Vec<TimeSummary> = durations
        .iter()
        .map(|(name, total)| TimeSummary {
            name: name.clone(),
            total: *total,
        })
        .collect();
    summaries.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
    summaries
}

/// Drops summaries shorter than `min`. A display filter only: totals are
/// computed before it is applied.
pub fn apply_min_duration(summaries: &[TimeSummary], min: Duration) -> Vec<TimeSummary> {
    summaries.iter().filter(|s| s.total >= min).cloned().collect()
}

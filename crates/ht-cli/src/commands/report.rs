//! Report command for summarizing recorded time.
//!
//! This module implements `ht report` over a calendar range (today, this week,
//! this month, this year or everything) with optional keyword filtering and a
//! minimum-duration display threshold, as text or JSON.

use std::fmt::{self, Write};

use anyhow::{Result, bail};
use chrono::{
    DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc,
};
use ht_core::{Aggregation, KeywordFilter, TimeSummary, aggregate, apply_min_duration};
use serde::Serialize;

use crate::commands::util::{format_duration, load_events, open_database};
use crate::config::{Config, Storage};

/// Report range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Range {
    Day,
    Week,
    Month,
    Year,
    All,
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Day => "today",
            Self::Week => "this week",
            Self::Month => "this month",
            Self::Year => "this year",
            Self::All => "all time",
        };
        f.write_str(label)
    }
}

/// What to report and how to filter it.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub range: Range,
    pub keywords: KeywordFilter,
    /// Display threshold; totals are computed before it applies.
    pub min_duration: Duration,
    pub app_only: bool,
    /// Aggregate with the storage-native query instead of replaying events.
    pub native: bool,
}

/// Computed report data.
#[derive(Debug)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub range: Range,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub aggregation: Aggregation,
}

// ========== Range Calculation ==========

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
fn local_midnight_to_utc(local_date: NaiveDate) -> DateTime<Utc> {
    let midnight = local_date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        // Single or ambiguous (DST fall-back): use the earlier time
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // DST spring-forward gap at midnight: fall back to treating the
            // naive midnight as UTC, which is within an hour of the real start
            midnight.and_utc() - Duration::hours(1)
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Half-open `[start, end)` boundaries for `range`, in local calendar terms.
pub fn get_range_boundaries(range: Range, today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    match range {
        Range::Day => (
            local_midnight_to_utc(today),
            local_midnight_to_utc(today + Duration::days(1)),
        ),
        Range::Week => {
            let days_since_monday = today.weekday().num_days_from_monday();
            let monday = today - Duration::days(i64::from(days_since_monday));
            (
                local_midnight_to_utc(monday),
                local_midnight_to_utc(monday + Duration::days(7)),
            )
        }
        Range::Month => {
            let start = first_of_month(today.year(), today.month());
            let end = if today.month() == 12 {
                first_of_month(today.year() + 1, 1)
            } else {
                first_of_month(today.year(), today.month() + 1)
            };
            (local_midnight_to_utc(start), local_midnight_to_utc(end))
        }
        Range::Year => (
            local_midnight_to_utc(first_of_month(today.year(), 1)),
            local_midnight_to_utc(first_of_month(today.year() + 1, 1)),
        ),
        Range::All => (
            DateTime::UNIX_EPOCH,
            NaiveDate::from_ymd_opt(9999, 12, 31)
                .unwrap_or(NaiveDate::MAX)
                .and_time(NaiveTime::MIN)
                .and_utc(),
        ),
    }
}

// ========== Report Generation ==========

/// Aggregates the configured backend over the range.
pub fn generate_report_data(
    config: &Config,
    options: &ReportOptions,
    today: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<ReportData> {
    let (range_start, range_end) = get_range_boundaries(options.range, today);

    let aggregation = if options.native {
        if config.storage != Storage::Sqlite {
            bail!("--native requires the sqlite storage backend");
        }
        let db = open_database(config)?;
        db.aggregate(range_start, range_end, &options.keywords)?
    } else {
        let events = load_events(config, Some(range_start), Some(range_end))?;
        tracing::debug!(count = events.len(), "replaying events");
        aggregate(&events, &options.keywords)
    };

    Ok(ReportData {
        generated_at,
        range: options.range,
        range_start,
        range_end,
        aggregation,
    })
}

fn keyword_list(keywords: &KeywordFilter) -> String {
    keywords.keywords().join(", ")
}

/// Writes one summary section: rows at or above `min`, longest first.
fn write_summary(output: &mut String, summaries: &[TimeSummary], min: Duration) {
    if summaries.is_empty() {
        writeln!(output, "No duration data to display for this filter.").unwrap();
        return;
    }
    let shown = apply_min_duration(summaries, min);
    if shown.is_empty() {
        writeln!(
            output,
            "No activities lasted longer than {}.",
            format_duration(min)
        )
        .unwrap();
        return;
    }
    for item in shown {
        writeln!(output, "{:<60} : {}", item.name, format_duration(item.total)).unwrap();
    }
}

/// Formats the human-readable report output.
pub fn format_report(data: &ReportData, options: &ReportOptions) -> String {
    let mut output = String::new();
    writeln!(output, "ACTIVITY REPORT: {}", data.range).unwrap();

    let filtered = !options.keywords.is_empty();
    let suffix = if filtered {
        let keywords = keyword_list(&options.keywords);
        writeln!(output).unwrap();
        writeln!(
            output,
            "--- Total Time For Activities Matching Keywords: [{keywords}] ---"
        )
        .unwrap();
        writeln!(
            output,
            "Total Duration: {}",
            format_duration(data.aggregation.matched_total)
        )
        .unwrap();
        format!(" (Filtered by Keywords: [{keywords}])")
    } else {
        String::new()
    };

    writeln!(output).unwrap();
    writeln!(output, "--- Time Spent Per Application{suffix} ---").unwrap();
    write_summary(
        &mut output,
        &data.aggregation.applications(),
        options.min_duration,
    );

    if !options.app_only {
        writeln!(output).unwrap();
        if filtered {
            writeln!(output, "--- Time Spent Per Window{suffix} ---").unwrap();
        } else {
            writeln!(output, "--- Time Spent Per Window (App - Title) ---").unwrap();
        }
        write_summary(&mut output, &data.aggregation.windows(), options.min_duration);
    }

    output
}

// ========== JSON Output ==========

#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub generated_at: String,
    pub range: JsonRange,
    pub keywords: Vec<String>,
    pub min_duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_total_ms: Option<i64>,
    pub applications: Vec<JsonSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<JsonSummary>>,
}

#[derive(Debug, Serialize)]
pub struct JsonRange {
    #[serde(rename = "type")]
    pub range_type: Range,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct JsonSummary {
    pub name: String,
    pub total_ms: i64,
}

fn json_summaries(summaries: &[TimeSummary], min: Duration) -> Vec<JsonSummary> {
    apply_min_duration(summaries, min)
        .into_iter()
        .map(|s| JsonSummary {
            name: s.name,
            total_ms: s.total.num_milliseconds(),
        })
        .collect()
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData, options: &ReportOptions) -> Result<String> {
    let report = JsonReport {
        generated_at: data.generated_at.to_rfc3339(),
        range: JsonRange {
            range_type: data.range,
            start: data.range_start.to_rfc3339(),
            end: data.range_end.to_rfc3339(),
        },
        keywords: options.keywords.keywords().to_vec(),
        min_duration_ms: options.min_duration.num_milliseconds(),
        matched_total_ms: (!options.keywords.is_empty())
            .then(|| data.aggregation.matched_total.num_milliseconds()),
        applications: json_summaries(&data.aggregation.applications(), options.min_duration),
        windows: (!options.app_only)
            .then(|| json_summaries(&data.aggregation.windows(), options.min_duration)),
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run(config: &Config, options: &ReportOptions, json: bool) -> Result<()> {
    let today = Local::now().date_naive();
    let data = generate_report_data(config, options, today, Utc::now())?;

    if json {
        let output = format_report_json(&data, options)?;
        println!("{output}");
    } else {
        let output = format_report(&data, options);
        print!("{output}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use ht_core::{ActiveWindow, ActivityEvent};
    use insta::assert_snapshot;

    fn options(keywords: &str, min_secs: i64) -> ReportOptions {
        ReportOptions {
            range: Range::All,
            keywords: KeywordFilter::parse(keywords),
            min_duration: Duration::seconds(min_secs),
            app_only: false,
            native: false,
        }
    }

    fn data(apps: &[(&str, i64)], windows: &[(&str, i64)], matched: i64) -> ReportData {
        let to_map = |items: &[(&str, i64)]| -> HashMap<String, Duration> {
            items
                .iter()
                .map(|(name, secs)| ((*name).to_string(), Duration::seconds(*secs)))
                .collect()
        };
        ReportData {
            generated_at: Utc.with_ymd_and_hms(2025, 1, 29, 16, 0, 0).unwrap(),
            range: Range::All,
            range_start: DateTime::UNIX_EPOCH,
            range_end: Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0).unwrap(),
            aggregation: Aggregation {
                by_application: to_map(apps),
                by_window: to_map(windows),
                matched_total: Duration::seconds(matched),
            },
        }
    }

    // ========== Range Calculation Tests ==========

    #[test]
    fn test_day_boundaries_for_known_date() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 29).unwrap();
        let (start, end) = get_range_boundaries(Range::Day, date);

        assert_eq!(start.with_timezone(&Local).date_naive(), date);
        assert_eq!(
            end.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 1, 30).unwrap()
        );
    }

    #[test]
    fn test_week_boundaries_on_sunday() {
        // Feb 2, 2025 is a Sunday
        let sunday = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        let (start, end) = get_range_boundaries(Range::Week, sunday);

        assert_eq!(
            start.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 1, 27).unwrap()
        );
        assert_eq!(
            end.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
        );
    }

    #[test]
    fn test_month_boundaries_roll_over_year() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 15).unwrap();
        let (start, end) = get_range_boundaries(Range::Month, date);

        assert_eq!(
            start.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
        );
        assert_eq!(
            end.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_year_and_all_boundaries() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let (start, end) = get_range_boundaries(Range::Year, date);
        assert_eq!(
            start.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
        assert_eq!(
            end.with_timezone(&Local).date_naive(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );

        let (start, end) = get_range_boundaries(Range::All, date);
        assert_eq!(start, DateTime::UNIX_EPOCH);
        assert_eq!(end.year(), 9999);
    }

    // ========== Output Formatting Tests ==========

    #[test]
    fn test_report_without_keywords() {
        let data = data(
            &[("firefox", 5400), ("kitty", 125), ("slack", 45)],
            &[
                ("firefox - Rust docs", 5400),
                ("kitty - vim", 125),
                ("slack - general", 45),
            ],
            0,
        );
        let output = format_report(&data, &options("", 60));
        assert_snapshot!(output, @r"
        ACTIVITY REPORT: all time

        --- Time Spent Per Application ---
        firefox                                                      : 1h 30m 0s
        kitty                                                        : 2m 5s

        --- Time Spent Per Window (App - Title) ---
        firefox - Rust docs                                          : 1h 30m 0s
        kitty - vim                                                  : 2m 5s
        ");
    }

    #[test]
    fn test_report_with_keywords_app_only() {
        let data = data(&[("code", 600), ("firefox", 30)], &[], 630);
        let mut options = options("ProjectX, ,Docs", 60);
        options.app_only = true;

        let output = format_report(&data, &options);
        assert_snapshot!(output, @r"
        ACTIVITY REPORT: all time

        --- Total Time For Activities Matching Keywords: [projectx, docs] ---
        Total Duration: 10m 30s

        --- Time Spent Per Application (Filtered by Keywords: [projectx, docs]) ---
        code                                                         : 10m 0s
        ");
    }

    #[test]
    fn test_report_empty_sections() {
        let output = format_report(&data(&[], &[], 0), &options("", 60));
        assert!(output.contains("No duration data to display for this filter."));

        let output = format_report(&data(&[("a", 10)], &[("a - x", 10)], 0), &options("", 60));
        assert_eq!(
            output.matches("No activities lasted longer than 1m 0s.").count(),
            2
        );
    }

    #[test]
    fn test_report_json_output() {
        let data = data(&[("code", 600), ("firefox", 30)], &[("code - main.rs", 600)], 0);
        let output = format_report_json(&data, &options("", 60)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["range"]["type"], "all");
        assert_eq!(value["min_duration_ms"], 60_000);
        assert_eq!(value["applications"].as_array().unwrap().len(), 1);
        assert_eq!(value["applications"][0]["name"], "code");
        assert_eq!(value["applications"][0]["total_ms"], 600_000);
        assert_eq!(value["windows"][0]["name"], "code - main.rs");
        assert!(value.get("matched_total_ms").is_none());
    }

    // ========== Backend Tests ==========

    fn seeded_config(temp: &tempfile::TempDir) -> Config {
        let config = Config {
            database_path: temp.path().join("ht.db"),
            ..Config::default()
        };
        let mut db = ht_db::Database::open(&config.database_path).unwrap();
        let at = |secs: i64| Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs);
        db.insert_events(&[
            ActivityEvent::window_changed(ActiveWindow::new("code", "projectx/main.rs"), at(0)),
            ActivityEvent::window_changed(ActiveWindow::new("firefox", "ProjectX docs"), at(900)),
            ActivityEvent::idle_start(at(1200)),
            ActivityEvent::idle_end(at(4800)),
            ActivityEvent::window_changed(ActiveWindow::new("slack", "general"), at(4810)),
            ActivityEvent::window_changed(ActiveWindow::new("code", "notes.md"), at(5000)),
        ])
        .unwrap();
        config
    }

    #[test]
    fn test_native_and_replay_reports_agree() {
        let temp = tempfile::tempdir().unwrap();
        let config = seeded_config(&temp);
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let now = Utc::now();

        for keywords in ["", "projectx"] {
            let mut opts = options(keywords, 0);
            let replayed = generate_report_data(&config, &opts, today, now).unwrap();
            opts.native = true;
            let native = generate_report_data(&config, &opts, today, now).unwrap();
            assert_eq!(replayed.aggregation, native.aggregation);
        }

        let data = generate_report_data(&config, &options("", 0), today, now).unwrap();
        let apps = data.aggregation.applications();
        assert_eq!(apps[0].name, "code");
        assert_eq!(apps[0].total, Duration::seconds(900));
        assert_eq!(apps[1].name, "firefox");
        // 300s up to idle start, plus the 10s after idle end before slack.
        assert_eq!(apps[1].total, Duration::seconds(310));
    }

    #[test]
    fn test_native_requires_sqlite() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            storage: Storage::Jsonl,
            log_path: temp.path().join("activity.jsonl"),
            ..Config::default()
        };
        let mut opts = options("", 0);
        opts.native = true;
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(generate_report_data(&config, &opts, today, Utc::now()).is_err());

        opts.native = false;
        let data = generate_report_data(&config, &opts, today, Utc::now()).unwrap();
        assert!(data.aggregation.by_application.is_empty());
    }
}

//! Events command for dumping recorded activity.
//!
//! Outputs events from the configured backend as JSONL, in the flat-file line format.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::commands::util::{load_events, parse_datetime};
use crate::config::Config;

/// Runs the events command, outputting events as JSONL to stdout.
pub fn run(config: &Config, after: Option<&str>, before: Option<&str>) -> Result<()> {
    let after = parse_bound(after, "after")?;
    let before = parse_bound(before, "before")?;

    let events = load_events(config, after, before)?;
    tracing::debug!(count = events.len(), "loaded events");

    for event in events {
        let json = serde_json::to_string(&event)?;
        println!("{json}");
    }

    Ok(())
}

fn parse_bound(s: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_datetime(s).with_context(|| format!("invalid --{name} timestamp")))
        .transpose()
}

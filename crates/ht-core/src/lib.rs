//! Core domain logic for the window activity tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Events: focus changes and idle markers as they flow through the pipeline
//! - Filtering: debouncing bursty compositor notifications into activity changes
//! - Idle detection: the optional in-process idle timer
//! - Aggregation: replaying recorded events into per-application and per-window totals

pub mod aggregate;
pub mod event;
pub mod filter;
pub mod idle;
mod state;

pub use aggregate::{
    Aggregation, KeywordFilter, SubjectTime, TimeSummary, aggregate, apply_min_duration, replay,
    window_key,
};
pub use event::{ActiveWindow, ActivityEvent, EventKind, UnknownEventKind};
pub use filter::{ActivityFilter, DEFAULT_TERMINAL_EMULATORS, PipelineConfig, WindowEventSink};
pub use idle::IdleTimer;
pub use state::DaemonState;

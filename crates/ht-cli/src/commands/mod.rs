//! CLI subcommand implementations.

pub mod control;
pub mod daemon;
pub mod events;
pub mod report;
pub mod util;

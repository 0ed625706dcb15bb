//! Window activity tracker CLI library.
//!
//! This crate provides the `ht` command: the tracking daemon, the control
//! socket client commands and reporting.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, DaemonArgs, IdleArg, RangeArg, ReportArgs, SourceArg};
pub use config::{Config, Storage};

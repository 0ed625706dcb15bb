//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Storage;

/// Window activity tracker.
///
/// Records which application window has focus, debounced and with idle time
/// excluded, and reports where the time went.
#[derive(Debug, Parser)]
#[command(name = "ht", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the `SQLite` database.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Path to the JSON Lines activity log.
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,

    /// Storage backend.
    #[arg(long, global = true, value_enum)]
    pub storage: Option<Storage>,

    /// Path to the daemon's control socket.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracking daemon in the foreground.
    Daemon(DaemonArgs),

    /// Report an idle transition to the running daemon.
    Idle {
        #[arg(value_enum)]
        action: IdleArg,
    },

    /// Toggle pause/resume on the running daemon.
    Pause,

    /// Show whether the running daemon is tracking or paused.
    Status,

    /// Stop the running daemon.
    Quit,

    /// Summarize recorded time per application and window.
    Report(ReportArgs),

    /// Dump recorded events as JSONL.
    Events {
        /// Only events at or after this time (ISO 8601 or e.g. "2 hours ago").
        #[arg(long)]
        after: Option<String>,

        /// Only events before this time (ISO 8601 or e.g. "2 hours ago").
        #[arg(long)]
        before: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Where focus events come from.
    #[arg(long, value_enum, default_value_t = SourceArg::Hyprland)]
    pub source: SourceArg,

    /// Minimum spacing between title changes of one terminal, in milliseconds.
    #[arg(long)]
    pub terminal_debounce_ms: Option<u64>,

    /// Quiet period before a focus switch is recorded, in milliseconds.
    #[arg(long)]
    pub general_debounce_ms: Option<u64>,

    /// Detect idleness in-process.
    #[arg(long)]
    pub idle_timer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Hyprland's event socket.
    Hyprland,
    /// Hyprland-format event lines on stdin.
    Stdin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdleArg {
    Start,
    End,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Time range to analyze.
    #[arg(long, value_enum, default_value_t = RangeArg::Month)]
    pub range: RangeArg,

    /// Comma-separated keywords; only matching windows are counted.
    #[arg(long)]
    pub keywords: Option<String>,

    /// Hide entries shorter than this many seconds.
    #[arg(long, default_value_t = 60)]
    pub min_duration: u64,

    /// Only show the per-application summary.
    #[arg(long)]
    pub app_only: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,

    /// Aggregate inside the database instead of replaying events.
    #[arg(long)]
    pub native: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RangeArg {
    Day,
    Week,
    Month,
    Year,
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_daemon_flags() {
        let cli = Cli::try_parse_from([
            "ht",
            "daemon",
            "--source",
            "stdin",
            "--general-debounce-ms",
            "0",
            "--db-path",
            "/tmp/x.db",
        ])
        .unwrap();
        let Some(Commands::Daemon(args)) = cli.command else {
            panic!("expected daemon command");
        };
        assert_eq!(args.source, SourceArg::Stdin);
        assert_eq!(args.general_debounce_ms, Some(0));
        assert_eq!(args.terminal_debounce_ms, None);
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn report_defaults() {
        let cli = Cli::try_parse_from(["ht", "report"]).unwrap();
        let Some(Commands::Report(args)) = cli.command else {
            panic!("expected report command");
        };
        assert_eq!(args.range, RangeArg::Month);
        assert_eq!(args.min_duration, 60);
        assert!(!args.json);
    }

    #[test]
    fn idle_requires_known_action() {
        assert!(Cli::try_parse_from(["ht", "idle", "start"]).is_ok());
        assert!(Cli::try_parse_from(["ht", "idle", "later"]).is_err());
    }
}

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use ht_core::KeywordFilter;
use ht_daemon::SourceKind;
use tracing_subscriber::EnvFilter;

use ht_cli::commands::{control, daemon, events, report};
use ht_cli::{Cli, Commands, Config, DaemonArgs, RangeArg, ReportArgs, SourceArg};

/// Loads config and applies the global command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config =
        Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = &cli.db_path {
        config.database_path.clone_from(path);
    }
    if let Some(path) = &cli.log_path {
        config.log_path.clone_from(path);
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    if let Some(socket) = &cli.socket {
        config.socket_path.clone_from(socket);
    }
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn run_daemon(mut config: Config, args: &DaemonArgs) -> Result<()> {
    if let Some(ms) = args.terminal_debounce_ms {
        config.terminal_debounce_ms = ms;
    }
    if let Some(ms) = args.general_debounce_ms {
        config.general_debounce_ms = ms;
    }
    if args.idle_timer {
        config.internal_idle_timer = true;
    }
    let source = match args.source {
        SourceArg::Hyprland => SourceKind::Hyprland,
        SourceArg::Stdin => SourceKind::Stdin,
    };
    daemon::run(&config, source)
}

fn run_report(config: &Config, args: &ReportArgs) -> Result<()> {
    let range = match args.range {
        RangeArg::Day => report::Range::Day,
        RangeArg::Week => report::Range::Week,
        RangeArg::Month => report::Range::Month,
        RangeArg::Year => report::Range::Year,
        RangeArg::All => report::Range::All,
    };
    let options = report::ReportOptions {
        range,
        keywords: args
            .keywords
            .as_deref()
            .map(KeywordFilter::parse)
            .unwrap_or_default(),
        min_duration: chrono::Duration::try_seconds(
            i64::try_from(args.min_duration).context("--min-duration is too large")?,
        )
        .context("--min-duration is too large")?,
        app_only: args.app_only,
        native: args.native,
    };
    report::run(config, &options, args.json)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so report and events output stays clean
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = load_config(&cli)?;

    match command {
        Commands::Daemon(args) => run_daemon(config, args)?,
        Commands::Idle { action } => control::idle(&config.socket_path, *action)?,
        Commands::Pause => control::pause(&config.socket_path)?,
        Commands::Status => control::status(&config.socket_path)?,
        Commands::Quit => control::quit(&config.socket_path)?,
        Commands::Report(args) => run_report(&config, args)?,
        Commands::Events { after, before } => {
            events::run(&config, after.as_deref(), before.as_deref())?;
        }
    }

    Ok(())
}

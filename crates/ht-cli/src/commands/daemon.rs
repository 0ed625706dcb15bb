//! `ht daemon`: runs the tracker in the foreground until quit or a signal.

use std::time::Duration;

use anyhow::{Context, Result};
use ht_daemon::{DaemonConfig, SourceKind};
use ht_db::{BatchSink, Database, JsonlLog};

use crate::commands::util::ensure_parent_dir;
use crate::config::{Config, Storage};

/// Grace period for blocking tasks (stdin reads) once the daemon has stopped.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds the daemon configuration from the loaded config.
pub fn daemon_config(config: &Config, source: SourceKind) -> DaemonConfig {
    DaemonConfig {
        socket_path: config.socket_path.clone(),
        pipeline: config.pipeline_config(),
        batch: config.batch_policy(),
        queue_capacity: config.queue_capacity,
        idle_threshold: config.idle_threshold(),
        source,
    }
}

/// Opens the configured backend. Failure here is fatal.
fn open_sink(config: &Config) -> Result<Box<dyn BatchSink + Send>> {
    match config.storage {
        Storage::Sqlite => {
            ensure_parent_dir(&config.database_path)?;
            let db = Database::open(&config.database_path).with_context(|| {
                format!("failed to open database {}", config.database_path.display())
            })?;
            Ok(Box::new(db))
        }
        Storage::Jsonl => {
            ensure_parent_dir(&config.log_path)?;
            let log = JsonlLog::open(&config.log_path).with_context(|| {
                format!("failed to open activity log {}", config.log_path.display())
            })?;
            Ok(Box::new(log))
        }
    }
}

pub fn run(config: &Config, source: SourceKind) -> Result<()> {
    let sink = open_sink(config)?;
    ensure_parent_dir(&config.socket_path)?;
    let daemon_config = daemon_config(config, source);

    tracing::info!(
        storage = ?config.storage,
        socket = %config.socket_path.display(),
        "starting daemon"
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let result = runtime.block_on(ht_daemon::run(daemon_config, sink));
    // A stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let stats = result.context("daemon failed to start")?;
    tracing::info!(
        committed = stats.committed,
        skipped = stats.skipped,
        failed_commits = stats.failed_commits,
        "daemon exited"
    );
    Ok(())
}

//! Daemon orchestration: spawns the workers and sequences their shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use ht_core::{ActivityFilter, DaemonState, IdleTimer, PipelineConfig};
use ht_db::{BatchPolicy, BatchSink, BatchWriter, WriterStats};
use tokio::io::Stdin;
use tokio::sync::mpsc;

use crate::DaemonError;
use crate::pipeline::{Producer, run_writer};
use crate::server::{CommandHandler, ControlServer};
use crate::shutdown::Shutdown;
use crate::source::{FocusSource, LineSource};

/// Where raw focus notifications come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceKind {
    #[default]
    Hyprland,
    /// Hyprland-format lines on standard input.
    Stdin,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pipeline: PipelineConfig,
    pub batch: BatchPolicy,
    pub queue_capacity: usize,
    /// Threshold for in-process idle detection; `None` leaves idle to the control socket.
    pub idle_threshold: Option<chrono::Duration>,
    pub source: SourceKind,
}

/// Connects the configured source and runs the daemon until shutdown.
pub async fn run<S>(config: DaemonConfig, sink: S) -> Result<WriterStats, DaemonError>
where
    S: BatchSink + Send + 'static,
{
    match config.source {
        SourceKind::Hyprland => {
            let source = LineSource::hyprland().await?;
            run_with_source(config, sink, source).await
        }
        SourceKind::Stdin => {
            let source: LineSource<Stdin> = LineSource::stdin();
            run_with_source(config, sink, source).await
        }
    }
}

/// Runs the daemon over an already-connected source.
///
/// Shutdown order: the producer and the acceptor stop first, then the last
/// queue sender is dropped so the writer drains the queue and commits.
pub async fn run_with_source<S, F>(
    config: DaemonConfig,
    sink: S,
    source: F,
) -> Result<WriterStats, DaemonError>
where
    S: BatchSink + Send + 'static,
    F: FocusSource + 'static,
{
    let shutdown = Shutdown::new();
    let state = Arc::new(DaemonState::new());
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

    let handler = CommandHandler::new(Arc::clone(&state), tx.clone(), shutdown.clone());
    let server = ControlServer::bind(&config.socket_path, handler)?;

    let signals = tokio::spawn(watch_signals(shutdown.clone()));
    let writer = tokio::spawn(run_writer(
        BatchWriter::new(sink, config.batch),
        rx,
        shutdown.clone(),
    ));

    let filter = ActivityFilter::new(config.pipeline, Arc::clone(&state));
    let mut producer = Producer::new(filter, state, tx, shutdown.clone());
    if let Some(threshold) = config.idle_threshold {
        producer = producer.with_idle_timer(IdleTimer::new(threshold, chrono::Utc::now()));
    }
    let producer = tokio::spawn(producer.run(source));
    let acceptor = tokio::spawn(server.run(shutdown.clone()));
    tracing::info!(source = ?config.source, "daemon started");

    match producer.await {
        Ok(emitted) => tracing::debug!(emitted, "producer joined"),
        Err(err) => {
            tracing::warn!(error = %err, "producer task failed");
            shutdown.trigger();
        }
    }
    if let Err(err) = acceptor.await {
        tracing::warn!(error = %err, "control socket task failed");
    }
    signals.abort();

    let stats = match writer.await {
        Ok(stats) => stats,
        Err(err) => {
            tracing::warn!(error = %err, "writer task failed");
            WriterStats::default()
        }
    };
    tracing::info!(committed = stats.committed, "daemon stopped");
    Ok(stats)
}

async fn watch_signals(shutdown: Shutdown) {
    tokio::select! {
        () = shutdown.triggered() => return,
        () = termination_signal() => {}
    }
    tracing::info!("termination signal received, shutting down");
    shutdown.trigger();
}

async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
        () = terminate => {}
    }
}

//! Commands that talk to the running daemon over its control socket.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use ht_daemon::protocol::{IdleAction, idle_command};

use crate::cli::IdleArg;

/// Sends one command and returns the daemon's `OK…` reply.
pub fn send(socket: &Path, command: &str) -> Result<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize tokio runtime")?;
    let reply = runtime.block_on(ht_daemon::client::request(socket, command))?;
    tracing::debug!(command, %reply, "daemon replied");
    Ok(reply)
}

/// `ht idle start|end`: stamps the transition with the current time.
pub fn idle(socket: &Path, action: IdleArg) -> Result<()> {
    let action = match action {
        IdleArg::Start => IdleAction::Start,
        IdleArg::End => IdleAction::End,
    };
    send(socket, &idle_command(action, Utc::now()))?;
    Ok(())
}

pub fn pause(socket: &Path) -> Result<()> {
    send(socket, "pause-toggle")?;
    let reply = send(socket, "status")?;
    println!("{}", status_message(&reply));
    Ok(())
}

pub fn status(socket: &Path) -> Result<()> {
    let reply = send(socket, "status")?;
    println!("{}", status_message(&reply));
    Ok(())
}

pub fn quit(socket: &Path) -> Result<()> {
    send(socket, "quit")?;
    println!("Daemon stopping.");
    Ok(())
}

fn status_message(reply: &str) -> &'static str {
    if reply.ends_with("paused") {
        "Tracking is paused."
    } else {
        "Tracking is active."
    }
}

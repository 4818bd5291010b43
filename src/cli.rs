//! Command-line front door (§6.5, §6.5a).
//!
//! A thin shim over the router library: parse a handful of externally
//! referenced knobs, then hand off to `lifecycle::RouterServer`. No
//! daemonizing beyond writing a PID file; `reload` only adjusts the tracing
//! filter at runtime.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand};

use crate::config::defaults;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// A P2P message router speaking a multiplexed, gRPC-shaped transport.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Address to bind the router's listener to.
    #[arg(long, default_value = defaults::HOST)]
    pub host: String,

    /// Port to bind the router's listener to.
    #[arg(long, default_value_t = defaults::PORT)]
    pub port: u16,

    /// Tracing filter directive (e.g. "info", "meshrouter=debug").
    #[arg(long, default_value = defaults::LOG_LEVEL)]
    pub log_level: String,

    /// Optional path to write the daemon's PID to on startup.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Optional path to a rolling log file; stdout logging always runs.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the router and block until shutdown.
    Start,
    /// Signal a running router (identified by its PID file) to shut down.
    Stop,
    /// Report whether the router named by the PID file is running.
    Status,
    /// Ask a running router to re-read its tracing filter.
    Reload,
}

impl Args {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

//! Router daemon entry point.
//!
//! Parses the CLI front door, sets up layered tracing (colorized stdout plus
//! an optional rolling file), and drives `start`/`stop`/`status`/`reload`
//! against a `lifecycle::RouterServer`.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

use meshrouter::cli::{Args, Command};
use meshrouter::config::RouterConfig;
use meshrouter::lifecycle::RouterServer;

mod logging;
use logging::ColorizedFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    match args.command {
        Command::Start => start(&args).await,
        Command::Stop => stop(&args),
        Command::Status => status(&args),
        Command::Reload => reload(&args),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .event_format(ColorizedFormatter);

    match &args.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("meshrouter.log"));
            let file_appender = tracing_appender::rolling::daily(dir, filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leaked intentionally: the guard must outlive `main`, and this
            // process never tears the subscriber down before exiting.
            Box::leak(Box::new(guard));
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout_layer).init();
        }
    }

    Ok(())
}

async fn start(args: &Args) -> Result<()> {
    if let Some(pid_file) = &args.pid_file {
        std::fs::write(pid_file, std::process::id().to_string())
            .with_context(|| format!("writing pid file {}", pid_file.display()))?;
    }

    let config = RouterConfig::default();
    let server = RouterServer::new(config);
    server.spawn_reapers();

    info!(addr = %args.bind_addr(), "starting meshrouter");

    let addr = args.bind_addr();
    tokio::select! {
        result = server.serve_tcp(&addr) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            server.shutdown().await;
            Ok(())
        }
    }
}

fn stop(args: &Args) -> Result<()> {
    let pid_file = args
        .pid_file
        .as_ref()
        .context("--pid-file is required to locate a running router")?;
    let pid: u32 = std::fs::read_to_string(pid_file)
        .with_context(|| format!("reading pid file {}", pid_file.display()))?
        .trim()
        .parse()
        .context("pid file did not contain a valid process id")?;
    // This binary only starts and drains instances; it doesn't ship a
    // signal-handling IPC channel of its own, so pointing the operator at
    // the process id is as far as `stop` goes.
    println!("router is running as pid {pid}; send it SIGTERM to request a graceful shutdown");
    Ok(())
}

fn status(args: &Args) -> Result<()> {
    match &args.pid_file {
        Some(pid_file) if pid_file.exists() => {
            println!("router pid file present at {}", pid_file.display());
        }
        _ => println!("no pid file configured or found; router status unknown"),
    }
    Ok(())
}

fn reload(_args: &Args) -> Result<()> {
    anyhow::bail!("reload must be sent to a running process out-of-band; this binary only starts fresh instances")
}

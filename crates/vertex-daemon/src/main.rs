use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_api::About;
use vertex_core::{wait_for_network, Config, Context};

// Overridden by the release pipeline.
const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = match option_env!("VERTEX_COMMIT") {
    Some(commit) => commit,
    None => "none",
};
const DATE: &str = match option_env!("VERTEX_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// Deadline for in-flight HTTP requests after shutdown begins.
const HTTP_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(2);

const NETWORK_PROBE_TARGET: &str = "google.com:80";

#[derive(Debug, Parser)]
#[command(name = "vertex", disable_version_flag = true)]
pub struct Args {
    /// Print the Vertex version.
    #[arg(long, short = 'v')]
    version: bool,

    /// Print the release date.
    #[arg(long)]
    date: bool,

    /// Print the commit hash.
    #[arg(long)]
    commit: bool,

    /// The Vertex host.
    #[arg(long)]
    host: Option<String>,

    /// The Vertex port.
    #[arg(long)]
    port: Option<u16>,

    /// The storage directory.
    #[arg(long)]
    storage: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("{VERSION}");
        return Ok(());
    }
    if args.date {
        println!("{DATE}");
        return Ok(());
    }
    if args.commit {
        println!("{COMMIT}");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    info!("Vertex starting...");

    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(storage) = args.storage {
        config.storage_path = storage;
    }

    wait_for_network(NETWORK_PROBE_TARGET).await;

    let context = Arc::new(Context::new(config.clone()).await);
    context
        .start()
        .await
        .context("failed to set up the storage layout")?;

    let about = About {
        version: VERSION.to_string(),
        commit: COMMIT.to_string(),
        date: DATE.to_string(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };

    let server = tokio::spawn(vertex_api::serve(Arc::clone(&context), about));

    println!("\n-- Vertex Client :: {}\n", config.url());

    shutdown_signal().await;
    info!("shutdown signal received");

    // Stops containers, closes loggers, and cancels the token the HTTP
    // server's graceful shutdown is watching.
    context.shutdown().await;

    match tokio::time::timeout(HTTP_SHUTDOWN_DEADLINE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(error = %err, "HTTP server error"),
        Ok(Err(err)) => warn!(error = %err, "HTTP server task panicked"),
        Err(_) => warn!("HTTP server did not drain within the shutdown deadline"),
    }

    info!("Vertex stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

//! Certkeeper - main entry point
//!
//! Automated DNS-01 certificate issuance with a persistent state machine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use certkeeper::acme::{AcmeClient, CertificateStorage};
use certkeeper::AppState;
use certkeeper_config::Config;
use certkeeper_store::KvStore;

/// Certkeeper - ACME certificate lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the admin listen address
    #[arg(short = 'l', long = "listen")]
    listen: Option<SocketAddr>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "log-json")]
    log_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    config.validate().context("Configuration validation failed")?;

    if cli.test {
        println!(
            "certkeeper: configuration {} test is successful",
            cli.config
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(defaults)".to_string())
        );
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(config))
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Config::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            info!("No configuration specified, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let kv = KvStore::open(&config.storage_dir).with_context(|| {
        format!(
            "Failed to open key-value store at {}",
            config.storage_dir.display()
        )
    })?;
    let certificates = CertificateStorage::new(&config.certs_dir).with_context(|| {
        format!(
            "Failed to create certificate directory {}",
            config.certs_dir.display()
        )
    })?;
    let client = AcmeClient::connect(&config.acme)
        .await
        .context("ACME directory check failed")?;

    let state = AppState::new(
        Arc::new(kv),
        Arc::new(client),
        Arc::new(certificates),
        config.scheduler.clone(),
    )
    .context("Failed to initialize application state")?;

    let scheduler = tokio::spawn(Arc::clone(&state.scheduler).run());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind admin interface on {}", config.listen))?;
    info!(
        listen = %config.listen,
        directory = %config.acme.directory(),
        "Certkeeper started"
    );

    axum::serve(listener, certkeeper::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Admin server failed")?;

    scheduler.abort();
    info!("Certkeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

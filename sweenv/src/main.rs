//! sweenv - run shell commands in a throwaway container
//!
//! Starts one container from the configured image, executes every line read
//! from stdin as a command inside it and prints each result as a JSON line.
//! The container is released on EOF or on a shutdown signal.

use std::path::PathBuf;

use anyhow::Result;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use sweenv::config::EnvironmentConfig;
use sweenv::logging::init_logging;
use sweenv::{with_session, ContainerSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = std::env::var("SWEENV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(&log_level)?;

    // Load configuration
    let config_path = std::env::var_os("SWEENV_CONFIG").map(PathBuf::from);
    let config = EnvironmentConfig::load(config_path.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        image = %config.image,
        executable = %config.executable,
        "Starting sweenv"
    );

    let served = with_session(config, |env| serve(env).boxed()).await??;

    info!(commands = served, "sweenv stopped");
    Ok(())
}

/// Execute stdin lines until EOF or a shutdown signal; returns the number run
async fn serve(env: &ContainerSession) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut served = 0;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        };

        let Some(command) = line else { break };
        if command.trim().is_empty() {
            continue;
        }

        let result = tokio::select! {
            result = env.execute(&command, None, None) => result,
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        };

        let line = match result {
            Ok(output) => serde_json::to_string(&output)?,
            Err(e) => {
                warn!(error = %e, "Command failed");
                serde_json::json!({ "error": e.to_string(), "timeout": e.is_timeout() }).to_string()
            }
        };

        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        served += 1;
    }

    Ok(served)
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

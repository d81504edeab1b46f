//! attestd - msgindex checksumming daemon
//!
//! Checksums completed epoch chunks of the local message index and/or serves
//! the archive of published checksums to other operators.

use anyhow::Context;
use attestd::config::{Config, LogFormat};
use attestd::service::{Service, ServiceError};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let level = if config.verbose { "attestd=debug" } else { "attestd=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    init_logging(&config);

    info!(
        "attestd v{} - msgindex checksum daemon",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let span = info_span!("attestation");
    let service = Arc::new(Service::from_config(&config, span).context("failed to start service")?);

    let mut engine_errors = None;
    if config.checksum_on {
        info!("Beginning checksumming");
        engine_errors = Some(service.start_checksumming()?);
    }

    let mut serving = None;
    if config.server_on {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let service = service.clone();
        serving = Some(tokio::spawn(async move { service.start_serving(listener).await }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(err) = async {
            match engine_errors.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        } => {
            error!("Checksumming stopped: {}", err);
            if serving.is_none() {
                close_after_failure(&service).await;
                return Err(err.into());
            }
            warn!("Continuing to serve the existing archive");
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        }
    }

    service.close().await.context("shutdown failed")?;
    if let Some(handle) = serving {
        handle.await??;
    }
    Ok(())
}

/// Close on the failure path, where the triggering error takes precedence.
async fn close_after_failure(service: &Service) -> Option<ServiceError> {
    let err = service.close().await.err()?;
    warn!("Shutdown after failure was not clean: {}", err);
    Some(err)
}

// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use cmp_bootstrapping::api::ApiClient;
use cmp_bootstrapping::cli::{Cli, Command};
use cmp_bootstrapping::config::{self, ClientConfig};
use cmp_bootstrapping::lifecycle::{self, PidFile};
use cmp_bootstrapping::{Bootstrapper, Error};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::config_path();
    let config = ClientConfig::load(&config_path)?;
    simple_logger::init_with_level(config::log_level(&config))?;
    if !config_path.exists() {
        warn!(
            "config file not found at {}, using defaults",
            config_path.display()
        );
    }

    let result = match cli.command {
        Command::Start { lines } => start(&config, lines).await,
        Command::Stop => lifecycle::stop(&config.pid_file(), lifecycle::STOP_TIMEOUT)
            .await
            .map(|_| ()),
    };
    if let Err(ref e) = result {
        error!("{e:#}");
    }
    result
}

async fn start(config: &ClientConfig, lines: usize) -> Result<()> {
    // Handlers must be in place before `stop` can find the PID file.
    let mut shutdown = Shutdown::install()?;
    let _pid_file = PidFile::acquire(&config.pid_file())?;
    let bootstrapper = Bootstrapper::new(ApiClient::new(config)?, config);
    info!(
        "cmp-bootstrapping starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    let run = bootstrapper.start(lines, &cancel);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        () = shutdown.recv() => {
            cancel.cancel();
            // The run terminates its child and returns `Cancelled`.
            run.await
        }
    };
    let summary = match result {
        Ok(summary) => summary,
        Err(e) if e.downcast_ref::<Error>().is_some_and(Error::is_cancelled) => {
            warn!("bootstrapping stopped before completion");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    info!(
        "bootstrapping finished: {} applied, {} pending, {} total",
        summary.applied, summary.pending, summary.total
    );
    Ok(())
}

#[cfg(unix)]
struct Shutdown {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Shutdown {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => info!("received SIGTERM, stopping"),
            _ = self.sigint.recv() => info!("received SIGINT, stopping"),
        }
    }
}

#[cfg(not(unix))]
struct Shutdown;

#[cfg(not(unix))]
impl Shutdown {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl-C, stopping"),
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
}

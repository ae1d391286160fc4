// volboot/src/cli/boot.rs
use clap::Args;
use colored::Colorize;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::model::UpdatePolicy;
use volboot_core::Bootstrap;

use super::provision::print_report;
use crate::frontend;

#[derive(Args, Debug)]
pub struct Boot {
    /// Replace every plugin even when it is already installed
    #[arg(long)]
    pub force: bool,

    /// Do not start the form front end even if it is enabled
    #[arg(long)]
    pub no_frontend: bool,
}

impl Boot {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let mut bootstrap = Bootstrap::new(config)?;
        if self.force {
            bootstrap = bootstrap.with_policy(UpdatePolicy::ForceRefresh);
        }
        let (report, mut supervisor) = bootstrap.run().await?;
        print_report(&report);
        println!(
            "{} Server {} at {}",
            "==>".bold().blue(),
            bootstrap.stage().to_string().bold(),
            config.server.local_base_url()
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let frontend_task = if config.frontend.enabled && !self.no_frontend {
            let frontend_config = config.clone();
            Some(tokio::spawn(async move {
                let stopped = async move {
                    let _ = stop_rx.await;
                };
                if let Err(e) = frontend::serve(&frontend_config, stopped).await {
                    warn!("Front end stopped: {}", e);
                }
            }))
        } else {
            None
        };

        let result = tokio::select! {
            result = supervisor.supervise() => result,
            () = shutdown_signal() => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        let _ = stop_tx.send(());
        if let Err(e) = supervisor.shutdown().await {
            warn!("Could not stop server cleanly: {}", e);
        }
        if let Some(task) = frontend_task {
            let _ = task.await;
        }
        result
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
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
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

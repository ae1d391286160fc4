// volboot-core/src/launch/supervisor.rs
use reqwest::Client;
use tokio::process::Child;
use tracing::{error, info, warn};
use volboot_common::config::Config;
use volboot_common::error::{BootError, Result};

use super::{spawn_server, wait_healthy};

/// Owns the running server process and restarts it when it exits.
#[derive(Debug)]
pub struct Supervisor {
    config: Config,
    client: Client,
    child: Child,
    restarts: u32,
}

impl Supervisor {
    /// Spawns the server and waits until its status endpoint answers.
    pub async fn start(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BootError::Generic(format!("Failed to build HTTP client: {e}")))?;
        let mut child = spawn_server(config)?;
        if let Err(e) = Self::await_health(config, &client, &mut child).await {
            let _ = child.start_kill();
            return Err(e);
        }
        Ok(Self {
            config: config.clone(),
            client,
            child,
            restarts: 0,
        })
    }

    async fn await_health(config: &Config, client: &Client, child: &mut Child) -> Result<()> {
        let url = format!(
            "{}{}",
            config.server.local_base_url(),
            config.server.status_path
        );
        wait_healthy(
            client,
            &url,
            config.server.health_attempts,
            config.server.health_interval(),
            child,
        )
        .await
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits on the server and restarts it each time it exits, up to
    /// `server.max_restarts`. Only returns once that limit is exhausted.
    pub async fn supervise(&mut self) -> Result<()> {
        let max = self.config.server.max_restarts;
        loop {
            let status = self.child.wait().await?;
            if self.restarts >= max {
                error!("Server exited ({}) and restart limit {} reached", status, max);
                return Err(BootError::HealthCheckError(format!(
                    "server exited ({status}) after {max} restart(s)"
                )));
            }
            self.restarts += 1;
            warn!(
                "Server exited ({}); restarting ({}/{})",
                status, self.restarts, max
            );

            let mut child = spawn_server(&self.config)?;
            match Self::await_health(&self.config, &self.client, &mut child).await {
                Ok(()) => info!("Server back up after restart {}", self.restarts),
                Err(e) => {
                    warn!("Restarted server did not become healthy: {}", e);
                    let _ = child.start_kill();
                }
            }
            self.child = child;
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Stopping server");
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;

    use super::*;

    fn config_against(server: &MockServer, dir: &std::path::Path) -> Config {
        let mut config = Config::for_volume(dir);
        config.server.host = "127.0.0.1".to_string();
        config.server.port = server.port();
        config.server.health_attempts = 5;
        config.server.health_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn restarts_until_limit_then_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/system_stats");
                then.status(200);
            })
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_against(&server, dir.path());
        config.server.program = "true".to_string();
        config.server.args = Vec::new();
        config.server.max_restarts = 2;

        let mut supervisor = Supervisor::start(&config).await.unwrap();
        let err = supervisor.supervise().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(supervisor.restarts(), 2);
    }

    #[tokio::test]
    async fn start_fails_when_never_healthy() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/system_stats");
                then.status(503);
            })
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_against(&server, dir.path());
        config.server.program = "sleep".to_string();
        config.server.args = vec!["30".to_string()];
        config.server.health_attempts = 3;

        let err = Supervisor::start(&config).await.unwrap_err();
        assert!(matches!(err, BootError::HealthCheckError(_)));
        assert!(config.output_dir().is_dir());
    }
}

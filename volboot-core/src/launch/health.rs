// volboot-core/src/launch/health.rs
use std::time::Duration;

use reqwest::Client;
use tokio::process::Child;
use tokio::time::sleep;
use tracing::{debug, info};
use volboot_common::error::{BootError, Result};

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Polls `url` until it answers 2xx, at most `attempts` times `interval`
/// apart. Fails early if `child` exits in the meantime.
pub async fn wait_healthy(
    client: &Client,
    url: &str,
    attempts: u32,
    interval: Duration,
    child: &mut Child,
) -> Result<()> {
    let request_timeout = interval.max(MIN_REQUEST_TIMEOUT);
    for attempt in 1..=attempts {
        match client.get(url).timeout(request_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Server healthy after {} attempt(s)", attempt);
                return Ok(());
            }
            Ok(response) => debug!("Health check {} returned {}", url, response.status()),
            Err(e) => debug!("Health check {} not ready: {}", url, e),
        }

        if let Some(status) = child.try_wait()? {
            return Err(BootError::HealthCheckError(format!(
                "server exited with {status} before becoming healthy"
            )));
        }
        if attempt < attempts {
            sleep(interval).await;
        }
    }
    Err(BootError::HealthCheckError(format!(
        "{url} did not respond after {attempts} attempts"
    )))
}
